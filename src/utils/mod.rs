//! Utility functions and helpers for the chatbridge gateway.
//!
//! This module provides cross-cutting concerns like structured logging,
//! token sanitization, and retry logic with backoff.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization and credential scrubbing.
//! - `retry`: Retry mechanisms that respect upstream `Retry-After` hints.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
