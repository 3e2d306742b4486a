// Upstream conversation service module
// Author: kelexine (https://github.com/kelexine)

mod client;
pub mod files;
pub mod socket;

pub use client::{UpstreamClient, UpstreamSession};
