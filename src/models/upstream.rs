// Upstream conversation service type definitions
// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parsed `data:` payload of the upstream conversation stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationFrame {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: Option<UpstreamMessage>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Message snapshot carried by a frame. Content fields are cumulative.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content: MessageBody,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
    System,
    Tool,
    #[serde(other)]
    Unknown,
}

/// The content type of a message, used to classify blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Code,
    MultimodalText,
    ExecutionOutput,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub text: Option<String>,
}

/// A content part: either a text fragment or a structured pointer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text(String),
    Asset(AssetPart),
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPart {
    pub content_type: String,
    #[serde(default)]
    pub asset_pointer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub model_slug: Option<String>,
    #[serde(default)]
    pub aggregate_result: Option<AggregateResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub metadata: CitationMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitationMetadata {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub extra: Option<CitationExtra>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitationExtra {
    #[serde(default)]
    pub cited_message_idx: Option<i64>,
}

/// Results of a code execution, including rendered images.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateResult {
    #[serde(default)]
    pub messages: Vec<AggregateMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateMessage {
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Part {
    /// Image asset pointer, if this part is one.
    pub fn image_pointer(&self) -> Option<&str> {
        match self {
            Part::Asset(asset) if asset.content_type == "image_asset_pointer" => {
                asset.asset_pointer.as_deref()
            }
            _ => None,
        }
    }
}

impl MessageBody {
    /// Concatenated text parts (the cumulative plain-text snapshot).
    pub fn joined_parts(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Image pointers carried by the parts, in order.
    pub fn image_pointers(&self) -> Vec<&str> {
        self.parts.iter().filter_map(Part::image_pointer).collect()
    }
}

impl UpstreamMessage {
    /// Author name, or empty.
    pub fn author_name(&self) -> &str {
        self.author.name.as_deref().unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.status.as_deref() == Some("finished_successfully")
    }
}

/// Strip the `scheme://` of a pointer like `file-service://file-abc`.
pub fn pointer_id(pointer: &str) -> &str {
    pointer.rsplit("://").next().unwrap_or(pointer)
}

/// Outbound upstream message built from a client message.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub id: String,
    pub author: OutboundAuthor,
    pub content: OutboundContent,
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundAuthor {
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundContent {
    pub content_type: String,
    pub parts: Vec<OutboundPart>,
}

/// A text fragment or a pointer to an uploaded image.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OutboundPart {
    Text(String),
    Asset(OutboundAsset),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundAsset {
    /// `file-service://<file id>`
    pub asset_pointer: String,
    pub size_bytes: usize,
    pub width: u32,
    pub height: u32,
}

/// Entry of `metadata.attachments` describing an uploaded file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub id: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(rename = "fileTokenSize", skip_serializing_if = "Option::is_none")]
    pub file_token_size: Option<usize>,
}

impl OutboundMessage {
    /// A single-part text message.
    pub fn text(role: &str, text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author: OutboundAuthor {
                role: role.to_string(),
            },
            content: OutboundContent {
                content_type: "text".to_string(),
                parts: vec![OutboundPart::Text(text)],
            },
            metadata: serde_json::Map::new(),
        }
    }

    /// A message mixing text and uploaded files.
    pub fn with_attachments(role: &str, parts: Vec<OutboundPart>, attachments: Vec<Attachment>) -> Self {
        let has_image = parts.iter().any(|p| matches!(p, OutboundPart::Asset(_)));
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "attachments".to_string(),
            serde_json::to_value(attachments).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author: OutboundAuthor {
                role: role.to_string(),
            },
            content: OutboundContent {
                content_type: if has_image { "multimodal_text" } else { "text" }.to_string(),
                parts,
            },
            metadata,
        }
    }
}

/// Reply of `POST /backend-api/files`: where to put the bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSlot {
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

/// Reply of `POST /backend-api/files/{id}/uploaded`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatus {
    #[serde(default)]
    pub status: String,
}

/// `{"download_url": ...}` returned by the file and interpreter download endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadInfo {
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Reply to a conversation request on the push-stream transport.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketRegistration {
    pub wss_url: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_snapshot() {
        let raw = r#"{
            "message": {
                "id": "m1",
                "author": {"role": "assistant", "name": null},
                "status": "in_progress",
                "content": {"content_type": "text", "parts": ["Hello"]},
                "metadata": {"model_slug": "gpt-4", "citations": []}
            },
            "conversation_id": "c1"
        }"#;
        let frame: ConversationFrame = serde_json::from_str(raw).unwrap();
        let message = frame.message.unwrap();
        assert_eq!(frame.conversation_id.as_deref(), Some("c1"));
        assert_eq!(message.author.role, Role::Assistant);
        assert_eq!(message.content.content_type, Some(ContentType::Text));
        assert_eq!(message.content.joined_parts(), "Hello");
        assert_eq!(message.metadata.model_slug.as_deref(), Some("gpt-4"));
    }

    #[test]
    fn test_parse_image_pointer_part() {
        let raw = r#"{
            "content_type": "multimodal_text",
            "parts": [{"content_type": "image_asset_pointer", "asset_pointer": "file-service://file-abc", "width": 1024}]
        }"#;
        let body: MessageBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.content_type, Some(ContentType::MultimodalText));
        assert_eq!(body.image_pointers(), vec!["file-service://file-abc"]);
        assert_eq!(body.joined_parts(), "");
        assert_eq!(pointer_id("file-service://file-abc"), "file-abc");
    }

    #[test]
    fn test_unknown_content_type_and_role() {
        let raw = r#"{"author": {"role": "critic"}, "content": {"content_type": "tether_browsing_display"}}"#;
        let message: UpstreamMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.author.role, Role::Unknown);
        assert_eq!(message.content.content_type, Some(ContentType::Other));
    }

    #[test]
    fn test_citation_index() {
        let raw = r#"{"metadata": {"url": "https://a.example", "extra": {"cited_message_idx": 3}}}"#;
        let citation: Citation = serde_json::from_str(raw).unwrap();
        assert_eq!(citation.metadata.extra.unwrap().cited_message_idx, Some(3));
    }
}
