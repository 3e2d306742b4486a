//! Data models for the OpenAI-compatible surface and the upstream service.
//!
//! This module contains the type definitions for request/response bodies used by:
//! - The inbound OpenAI-compatible API (`openai`)
//! - The upstream conversation service (`upstream`)
//! - Model name registry (`registry`)

// Author: kelexine (https://github.com/kelexine)

pub mod openai;
pub mod registry;
pub mod upstream;

pub use openai::{ChatCompletionChunk, ChatCompletionRequest, ChatMessage, MessageContent};
pub use registry::{ModelProfile, ModelRegistry};
pub use upstream::{ContentType, ConversationFrame, Role, UpstreamMessage};
