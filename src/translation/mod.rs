//! Stream translation: upstream conversation snapshots → chat completion chunks.
//!
//! - `source`: event sources over SSE bodies and WebSocket messages
//! - `differ`, `blocks`: snapshot differencing and fenced block tracking
//! - `accumulator`, `citation`, `sandbox`: inline marker buffering and rewriting
//! - `images`: image pointer resolution
//! - `engine`: per-turn state machine
//! - `channel`: output channel, keep-alive and the consumer stream
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod accumulator;
pub mod artifacts;
pub mod blocks;
pub mod channel;
pub mod citation;
pub mod differ;
pub mod engine;
pub mod images;
pub mod sandbox;
pub mod source;

pub use artifacts::{ArtifactSource, TurnDeps};
pub use channel::{translate_stream, TurnContext, TurnItem, TurnStream};
pub use engine::{TurnSummary, TurnTranslator};
pub use images::{ImageMode, ImageRecord};
pub use source::{EventSource, SourceEvent, SseEventSource, WebSocketEventSource};
