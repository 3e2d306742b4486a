// Collaborators the translation engine resolves artifacts through
// Author: kelexine (https://github.com/kelexine)

use crate::config::OutputConfig;
use crate::error::Result;
use crate::storage::FileStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Upstream lookups needed to turn pointers and sandbox paths into content.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Download URL of an uploaded or generated file (`file-service://<id>`).
    async fn file_download_url(&self, file_id: &str) -> Result<String>;

    /// Download URL of a file written by the code-execution sandbox.
    async fn sandbox_download_url(
        &self,
        conversation_id: &str,
        message_id: &str,
        sandbox_path: &str,
    ) -> Result<String>;

    /// Fetch the bytes behind a download URL.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// Shared dependencies of every turn.
#[derive(Clone)]
pub struct TurnDeps {
    pub artifacts: Arc<dyn ArtifactSource>,
    pub store: Arc<FileStore>,
    pub output: OutputConfig,
}

impl TurnDeps {
    pub fn new(artifacts: Arc<dyn ArtifactSource>, store: Arc<FileStore>, output: OutputConfig) -> Self {
        Self {
            artifacts,
            store,
            output,
        }
    }
}
