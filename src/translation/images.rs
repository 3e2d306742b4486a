// Image asset resolution and rendering
// Author: kelexine (https://github.com/kelexine)

use super::artifacts::TurnDeps;
use crate::error::Result;
use crate::models::upstream::{pointer_id, UpstreamMessage};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Marker the execution tool prints where a rendered figure belongs.
pub const IMAGE_DISPLAYED: &str = "<<ImageDisplayed>>";
/// Shown in place of [`IMAGE_DISPLAYED`] until the figure is resolved.
pub const IMAGE_PENDING_NOTICE: &str = "Image rendering, please wait...\n";

/// How resolved images reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// Rendered into the text stream.
    #[default]
    Inline,
    /// Collected as records for the image-generation endpoint. With
    /// `b64_json` the record carries the image bytes base64-encoded.
    SideChannel { b64_json: bool },
}

/// An image collected in side-channel mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Upstream download URL.
    pub image_url: String,
    /// Public URL, or base64 payload for `b64_json`.
    pub value: String,
}

#[derive(Debug)]
pub struct ImageExtractor {
    mode: ImageMode,
    seen: HashSet<String>,
    last_execution_image: Option<String>,
    pending_execution_image: Option<String>,
    records: Vec<ImageRecord>,
}

impl ImageExtractor {
    pub fn new(mode: ImageMode) -> Self {
        Self {
            mode,
            seen: HashSet::new(),
            last_execution_image: None,
            pending_execution_image: None,
            records: Vec::new(),
        }
    }

    /// Render every not yet resolved image pointer of `message`.
    pub async fn render_pointers(
        &mut self,
        message: &UpstreamMessage,
        deps: &TurnDeps,
        has_prior_output: bool,
    ) -> String {
        let mut text = String::new();
        for pointer in message.content.image_pointers() {
            if !self.seen.insert(pointer.to_string()) {
                debug!("Image pointer {} already resolved", pointer);
                continue;
            }
            match self.resolve(pointer_id(pointer), deps).await {
                Ok(record) => {
                    let prior = has_prior_output || !text.is_empty();
                    text.push_str(&self.render(record, deps, prior));
                }
                Err(e) => {
                    error!("Image {} could not be resolved: {}", pointer, e);
                    text.push_str(&format!("\n```\nError: image download failed: {}\n```\n", e));
                }
            }
        }
        text
    }

    /// Resolve a figure announced by the execution tool. It is rendered
    /// later, when the result block closes.
    pub async fn observe_execution(&mut self, message: &UpstreamMessage, deps: &TurnDeps) {
        let Some(aggregate) = &message.metadata.aggregate_result else {
            return;
        };
        let images = aggregate
            .messages
            .iter()
            .filter(|m| m.message_type.as_deref() == Some("image"))
            .filter_map(|m| m.image_url.as_deref());

        for image_url in images {
            let file_id = pointer_id(image_url).to_string();
            if self.last_execution_image.as_deref() == Some(file_id.as_str()) {
                continue;
            }
            self.last_execution_image = Some(file_id.clone());
            self.seen.insert(image_url.to_string());
            info!("Execution output image {}", file_id);

            match self.resolve(&file_id, deps).await {
                Ok(record) => match self.mode {
                    ImageMode::Inline => self.pending_execution_image = Some(record.value),
                    ImageMode::SideChannel { .. } => self.records.push(record),
                },
                Err(e) => error!("Execution image {} could not be resolved: {}", file_id, e),
            }
        }
    }

    /// Rendered text of the pending execution image, if any.
    pub fn take_execution_image(&mut self, deps: &TurnDeps) -> String {
        let Some(url) = self.pending_execution_image.take() else {
            return String::new();
        };
        let output = &deps.output;
        if output.plain_image_url_output {
            format!("Image link: {}\n", url)
        } else if output.markdown_image_output {
            format!("![image]({})\n[Download link]({})\n", url, url)
        } else {
            String::new()
        }
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }

    async fn resolve(&self, file_id: &str, deps: &TurnDeps) -> Result<ImageRecord> {
        let download_url = deps.artifacts.file_download_url(file_id).await?;

        let value = match self.mode {
            ImageMode::SideChannel { b64_json: true } => {
                let bytes = deps.artifacts.fetch(&download_url).await?;
                STANDARD.encode(&bytes)
            }
            _ if deps.output.use_hosted_image_urls => download_url.clone(),
            _ => {
                let bytes = deps.artifacts.fetch(&download_url).await?;
                deps.store.persist_image(&bytes).await?
            }
        };

        Ok(ImageRecord {
            image_url: download_url,
            value,
        })
    }

    fn render(&mut self, record: ImageRecord, deps: &TurnDeps, has_prior_output: bool) -> String {
        if let ImageMode::SideChannel { .. } = self.mode {
            self.records.push(record);
            return String::new();
        }

        let url = record.value;
        let output = &deps.output;
        if output.plain_image_url_output {
            let lead = if has_prior_output { "\n" } else { "" };
            format!("{}Image link: {}\n", lead, url)
        } else if output.markdown_image_output {
            format!("\n![image]({})\n[Download link]({})\n", url, url)
        } else {
            String::new()
        }
    }
}
