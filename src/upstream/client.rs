// Upstream conversation service client
// Author: kelexine (https://github.com/kelexine)

use super::files::{self, InputFile, UploadedFile};
use super::socket;
use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::models::openai::{ChatMessage, MessageContent};
use crate::models::registry::{ModelProfile, ModelRegistry};
use crate::models::upstream::{
    DownloadInfo, OutboundMessage, OutboundPart, SocketRegistration, UploadSlot, UploadStatus,
};
use crate::translation::artifacts::ArtifactSource;
use crate::translation::source::{ByteStream, EventSource, SseEventSource, WebSocketEventSource};
use crate::utils::retry::{parse_retry_after, with_retry, AttemptError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Client for the upstream `backend-api`.
///
/// Handles:
/// - Opening conversations (SSE bodies or push-stream registrations)
/// - Resolving file and sandbox download URLs
/// - Fetching artifact bytes
/// - Uploading client images
/// - Looking up gizmo definitions
/// - Hiding conversations after a turn
pub struct UpstreamClient {
    http_client: Client,
    config: UpstreamConfig,
    root: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        // Configure HTTP client for long-lived streaming responses
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created HTTP client with connection pooling and keep-alive");

        Ok(Self {
            http_client,
            root: config.root(),
            config: config.clone(),
        })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Build the conversation payload from prepared messages.
    pub fn build_payload(messages: &[OutboundMessage], profile: &ModelProfile, history_disabled: bool) -> Value {
        json!({
            "action": "next",
            "messages": messages,
            "parent_message_id": uuid::Uuid::new_v4().to_string(),
            "model": profile.payload_model(),
            "timezone_offset_min": -480,
            "suggestions": [],
            "history_and_training_disabled": history_disabled,
            "conversation_mode": profile.conversation_mode(),
            "force_paragen": false,
            "force_rate_limit": false,
        })
    }

    /// Convert client messages to upstream messages.
    ///
    /// For models that take images, `image_url` parts are uploaded and
    /// referenced as attachments. A part that cannot be loaded or uploaded
    /// is logged and left out.
    pub async fn outbound_messages(
        &self,
        token: &str,
        messages: &[ChatMessage],
        profile: &ModelProfile,
    ) -> Vec<OutboundMessage> {
        let mut outbound = Vec::with_capacity(messages.len());
        for message in messages {
            let parts = match &message.content {
                MessageContent::Parts(parts) if profile.accepts_images() => parts,
                content => {
                    outbound.push(OutboundMessage::text(&message.role, content.to_text()));
                    continue;
                }
            };

            let mut new_parts = Vec::new();
            let mut attachments = Vec::new();
            for part in parts {
                if part.part_type == "text" {
                    if let Some(text) = &part.text {
                        new_parts.push(OutboundPart::Text(text.clone()));
                    }
                    continue;
                }
                let Some(location) = part.image_location() else {
                    continue;
                };
                match self.attach_input(token, location).await {
                    Ok(file) => {
                        if let Some(asset) = file.asset_part() {
                            new_parts.push(OutboundPart::Asset(asset));
                        }
                        attachments.push(file.attachment());
                    }
                    Err(e) => warn!("Skipping image part: {}", e),
                }
            }
            outbound.push(OutboundMessage::with_attachments(&message.role, new_parts, attachments));
        }
        outbound
    }

    async fn attach_input(&self, token: &str, location: &str) -> Result<UploadedFile> {
        let input = if location.starts_with("data:") {
            InputFile::from_data_uri(location)?
        } else {
            self.fetch_input(location).await?
        };
        self.upload_file(token, input).await
    }

    /// Download a client-referenced file, taking its MIME type from the response.
    pub async fn fetch_input(&self, url: &str) -> Result<InputFile> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::InvalidRequest(format!(
                "failed to fetch {}: HTTP {}",
                url, status
            )));
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(InputFile {
            bytes: response.bytes().await?,
            mime_type,
        })
    }

    /// Upload a file to the upstream files service.
    ///
    /// Three steps: reserve an upload slot, `PUT` the bytes to the returned
    /// blob URL, then confirm the upload.
    pub async fn upload_file(&self, token: &str, input: InputFile) -> Result<UploadedFile> {
        let mut mime_type = input.mime_type;
        let mut dimensions = None;
        if mime_type.starts_with("image/") {
            dimensions = files::image_dimensions(&input.bytes);
            if dimensions.is_none() {
                warn!("Unreadable {} image header, uploading as text/plain", mime_type);
                mime_type = "text/plain".to_string();
            }
        }
        let use_case = files::use_case(&mime_type);
        if use_case == "ace_upload" {
            mime_type.clear();
        }
        let file_name = files::content_name(&input.bytes, &mime_type);
        let size_bytes = input.bytes.len();
        debug!("Uploading {} ({} bytes, {})", file_name, size_bytes, use_case);

        let response = self
            .http_client
            .post(format!("{}/backend-api/files", self.root))
            .bearer_auth(token)
            .json(&json!({
                "file_name": file_name,
                "file_size": size_bytes,
                "use_case": use_case,
            }))
            .send()
            .await?;
        let slot: UploadSlot = expect_json(response, "reserve upload").await?;
        let (Some(upload_url), Some(file_id)) = (slot.upload_url, slot.file_id) else {
            return Err(ProxyError::Upstream(
                "upload reply carries no upload_url or file_id".to_string(),
            ));
        };

        let response = self
            .http_client
            .put(&upload_url)
            .header(CONTENT_TYPE, mime_type.as_str())
            .header("x-ms-blob-type", "BlockBlob")
            .body(input.bytes)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream(format!("upload PUT failed: HTTP {}: {}", status, body)));
        }

        let response = self
            .http_client
            .post(format!("{}/backend-api/files/{}/uploaded", self.root, file_id))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        let confirmation: UploadStatus = expect_json(response, "confirm upload").await?;
        if confirmation.status != "success" {
            return Err(ProxyError::Upstream(format!(
                "upload of {} not confirmed: {}",
                file_id, confirmation.status
            )));
        }

        info!("Uploaded {} as {}", file_name, file_id);
        Ok(UploadedFile {
            file_id,
            file_name,
            size_bytes,
            mime_type,
            dimensions,
        })
    }

    /// Definition of a custom assistant (gizmo).
    pub async fn gizmo(&self, token: &str, gizmo_id: &str) -> Result<Value> {
        let response = self
            .http_client
            .get(format!("{}/backend-api/gizmos/{}", self.root, gizmo_id))
            .bearer_auth(token)
            .send()
            .await?;
        expect_json(response, "fetch gizmo").await
    }

    /// Attach gizmo definitions to the registry, dropping gizmo models the
    /// account cannot reach. Without a token every gizmo model is dropped.
    pub async fn verify_gizmos(&self, token: Option<&str>, registry: &mut ModelRegistry) {
        for (name, gizmo_id) in registry.gizmo_models() {
            let outcome = match token {
                Some(token) => self.gizmo(token, &gizmo_id).await,
                None => Err(ProxyError::Unauthorized("no upstream token".to_string())),
            };
            match outcome {
                Ok(gizmo) => {
                    info!("Model {} uses gizmo {}", name, gizmo_id);
                    registry.attach_gizmo(&name, gizmo);
                }
                Err(e) => {
                    warn!("Gizmo {} is not accessible, dropping model {}: {}", gizmo_id, name, e);
                    registry.remove(&name);
                }
            }
        }
    }

    /// Open a conversation turn and return its event source.
    ///
    /// Retryable failures are retried before any byte is streamed. A request
    /// that still fails yields a source whose body is the error payload, so
    /// the turn reports it as a fenced error chunk.
    pub async fn start_conversation(&self, token: &str, payload: &Value) -> Result<Box<dyn EventSource>> {
        let url = format!("{}/backend-api/conversation", self.root);
        debug!("Opening upstream conversation at {}", url);

        let client = &self.http_client;
        let url = url.as_str();
        let outcome = with_retry("Start conversation", self.config.max_retries, || async {
            let response = client
                .post(url)
                .bearer_auth(token)
                .header("Accept", "text/event-stream")
                .json(payload)
                .send()
                .await
                .map_err(|e| AttemptError::new(503, format!("network error: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            Err(AttemptError::new(status.as_u16(), body).with_retry_after(retry_after))
        })
        .await;

        match outcome {
            Ok(response) => self.event_source(response).await,
            Err(e) => {
                error!("Upstream conversation failed: HTTP {} - {}", e.status, e.body);
                let body = if e.body.trim().is_empty() {
                    format!("HTTP {}", e.status)
                } else {
                    e.body
                };
                Ok(Box::new(SseEventSource::new(single_chunk(Bytes::from(body)))))
            }
        }
    }

    async fn event_source(&self, response: Response) -> Result<Box<dyn EventSource>> {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if !is_json {
            let body: ByteStream = Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(ProxyError::Http)),
            );
            return Ok(Box::new(SseEventSource::new(body)));
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<SocketRegistration>(&body) {
            Ok(registration) => {
                info!("Upstream switched to push stream");
                let messages = socket::connect(&registration.wss_url).await?;
                Ok(Box::new(WebSocketEventSource::new(messages)))
            }
            Err(_) => {
                warn!("Unexpected JSON reply to conversation request");
                Ok(Box::new(SseEventSource::new(single_chunk(body))))
            }
        }
    }

    /// Download URL of a file (`file-service://<id>` pointer).
    pub async fn file_download_url(&self, token: &str, file_id: &str) -> Result<String> {
        let url = format!("{}/backend-api/files/{}/download", self.root, file_id);
        self.download_url(token, &url, &[]).await
    }

    /// Download URL of a file written by the code-execution sandbox.
    pub async fn sandbox_download_url(
        &self,
        token: &str,
        conversation_id: &str,
        message_id: &str,
        sandbox_path: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/backend-api/conversation/{}/interpreter/download",
            self.root, conversation_id
        );
        self.download_url(
            token,
            &url,
            &[("message_id", message_id), ("sandbox_path", sandbox_path)],
        )
        .await
    }

    async fn download_url(&self, token: &str, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProxyError::Upstream(format!("HTTP {}: {}", status, body)));
        }

        let info: DownloadInfo = serde_json::from_str(&body)?;
        info.download_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProxyError::Upstream("response carries no download_url".to_string()))
    }

    /// Fetch the bytes behind a (pre-signed) download URL.
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Upstream(format!("download failed: HTTP {}", status)));
        }
        Ok(response.bytes().await?)
    }

    /// Hide a conversation from the account's history.
    pub async fn hide_conversation(&self, token: &str, conversation_id: &str) -> Result<()> {
        let url = format!("{}/backend-api/conversation/{}", self.root, conversation_id);
        let response = self
            .http_client
            .patch(&url)
            .bearer_auth(token)
            .json(&json!({ "is_visible": false }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream(format!("HTTP {}: {}", status, body)));
        }
        info!("Hid conversation {}", conversation_id);
        Ok(())
    }
}

async fn expect_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ProxyError::Upstream(format!("{} failed: HTTP {}: {}", what, status, body)));
    }
    Ok(serde_json::from_str(&body)?)
}

fn single_chunk(body: Bytes) -> ByteStream {
    Box::pin(stream::once(async move { Ok(body) }))
}

/// An [`UpstreamClient`] bound to the access token of one request.
#[derive(Clone)]
pub struct UpstreamSession {
    client: Arc<UpstreamClient>,
    token: String,
}

impl UpstreamSession {
    pub fn new(client: Arc<UpstreamClient>, token: String) -> Self {
        Self { client, token }
    }

    pub async fn start_conversation(&self, payload: &Value) -> Result<Box<dyn EventSource>> {
        self.client.start_conversation(&self.token, payload).await
    }

    pub async fn hide_conversation(&self, conversation_id: &str) -> Result<()> {
        self.client.hide_conversation(&self.token, conversation_id).await
    }

    pub async fn outbound_messages(&self, messages: &[ChatMessage], profile: &ModelProfile) -> Vec<OutboundMessage> {
        self.client.outbound_messages(&self.token, messages, profile).await
    }
}

#[async_trait]
impl ArtifactSource for UpstreamSession {
    async fn file_download_url(&self, file_id: &str) -> Result<String> {
        self.client.file_download_url(&self.token, file_id).await
    }

    async fn sandbox_download_url(
        &self,
        conversation_id: &str,
        message_id: &str,
        sandbox_path: &str,
    ) -> Result<String> {
        self.client
            .sandbox_download_url(&self.token, conversation_id, message_id, sandbox_path)
            .await
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.client.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(gizmo: Option<&str>) -> ModelProfile {
        ModelProfile {
            name: "gpt-4-s".to_string(),
            upstream_model: "gpt-4".to_string(),
            gizmo_id: gizmo.map(str::to_string),
            gizmo: None,
        }
    }

    #[test]
    fn test_payload_format() {
        let messages = vec![OutboundMessage::text("user", "Hi".to_string())];
        let payload = UpstreamClient::build_payload(&messages, &profile(None), true);

        assert_eq!(payload["action"], "next");
        assert_eq!(payload["model"], "gpt-4");
        assert_eq!(payload["timezone_offset_min"], -480);
        assert_eq!(payload["history_and_training_disabled"], true);
        assert_eq!(payload["conversation_mode"]["kind"], "primary_assistant");
        assert_eq!(payload["messages"][0]["author"]["role"], "user");
        assert_eq!(payload["messages"][0]["content"]["content_type"], "text");
        assert_eq!(payload["messages"][0]["content"]["parts"][0], "Hi");
        assert!(payload["parent_message_id"].is_string());
        assert_eq!(payload["messages"][0]["metadata"], json!({}));
    }

    #[tokio::test]
    async fn test_text_only_model_flattens_parts() {
        let client = UpstreamClient::new(&UpstreamConfig::default()).unwrap();
        let mut text_only = profile(None);
        text_only.upstream_model = "text-davinci-002-render-sha".to_string();
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: serde_json::from_value(json!([
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ]))
            .unwrap(),
        }];

        let outbound = client.outbound_messages("tok", &messages, &text_only).await;
        let value = serde_json::to_value(&outbound).unwrap();
        assert_eq!(value[0]["content"]["content_type"], "text");
        assert_eq!(value[0]["content"]["parts"], json!(["what is this"]));
    }

    #[test]
    fn test_gizmo_payload() {
        let payload = UpstreamClient::build_payload(&[], &profile(Some("g-1")), false);
        assert_eq!(payload["model"], "gpt-4-gizmo");
        assert_eq!(payload["conversation_mode"]["gizmo_id"], "g-1");
    }
}
