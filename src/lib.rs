// chatbridge - OpenAI-compatible streaming gateway for a ChatGPT-style conversation backend
// Author: kelexine (https://github.com/kelexine)

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod server;
pub mod storage;
pub mod translation;
pub mod upstream;
pub mod usage;
pub mod utils;
