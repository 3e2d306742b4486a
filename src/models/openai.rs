// OpenAI Chat Completions / Images API type definitions
// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound `/v1/chat/completions` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// One message of the inbound conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content: a plain string or an array of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// A typed content part: `text` or `image_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Value>,
}

impl ContentPart {
    /// Location of an `image_url` part: `{"url": ...}` or a bare string.
    pub fn image_location(&self) -> Option<&str> {
        if self.part_type != "image_url" {
            return None;
        }
        let value = self.image_url.as_ref()?;
        value
            .get("url")
            .and_then(Value::as_str)
            .or_else(|| value.as_str())
            .filter(|url| !url.is_empty())
    }
}

impl MessageContent {
    /// Text carried by this content, joining text parts.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.part_type == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One streamed `chat.completion.chunk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// `{role}`, `{content}` or `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Literal terminal frame of every stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

impl ChatCompletionChunk {
    fn with_delta(id: &str, created: i64, model: &str, delta: ChunkDelta, finish: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish.map(str::to_string),
            }],
        }
    }

    /// First chunk of a turn, announcing the assistant role.
    pub fn role(id: &str, created: i64, model: &str) -> Self {
        let delta = ChunkDelta {
            role: Some("assistant".to_string()),
            content: None,
        };
        Self::with_delta(id, created, model, delta, None)
    }

    /// A content delta. Keep-alive chunks carry an empty string.
    pub fn content(id: &str, created: i64, model: &str, text: impl Into<String>) -> Self {
        let delta = ChunkDelta {
            role: None,
            content: Some(text.into()),
        };
        Self::with_delta(id, created, model, delta, None)
    }

    /// Empty content delta sent while the upstream is silent.
    pub fn is_keepalive(&self) -> bool {
        self.choices.iter().all(|choice| {
            choice.delta.role.is_none()
                && choice.delta.content.as_deref() == Some("")
                && choice.finish_reason.is_none()
        })
    }

    /// Terminal chunk with an empty delta and `finish_reason: "stop"`.
    pub fn stop(id: &str, created: i64, model: &str) -> Self {
        Self::with_delta(id, created, model, ChunkDelta::default(), Some("stop"))
    }

    /// Format as a Server-Sent Event frame.
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", data)
    }
}

/// Non-streaming `chat.completion` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
    pub system_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Inbound `/v1/images/generations` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response_format: ImageResponseFormat,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageResponseFormat {
    #[default]
    Url,
    B64Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    pub revised_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
}

impl ChatCompletionResponse {
    /// A single-choice `chat.completion` carrying the whole assistant text.
    pub fn new(id: &str, created: i64, model: &str, content: String, usage: Usage) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion".to_string(),
            created,
            model: model.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
            usage,
            system_fingerprint: None,
        }
    }
}

/// `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

impl ModelList {
    pub fn from_names(names: &[String]) -> Self {
        Self {
            object: "list".to_string(),
            data: names
                .iter()
                .map(|name| ModelCard {
                    id: name.clone(),
                    object: "model".to_string(),
                    owned_by: "chatbridge".to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_chunk_sse_format() {
        let chunk = ChatCompletionChunk::content("chatcmpl-1", 1700000000, "gpt-4", "Hello");
        let sse = chunk.to_sse();
        assert!(sse.starts_with("data: {"));
        assert!(sse.ends_with("\n\n"));
        assert!(sse.contains("\"object\":\"chat.completion.chunk\""));
        assert!(sse.contains("\"delta\":{\"content\":\"Hello\"}"));
        assert!(sse.contains("\"finish_reason\":null"));
    }

    #[test]
    fn test_role_and_stop_deltas() {
        let role = serde_json::to_value(ChatCompletionChunk::role("id", 1, "m")).unwrap();
        assert_eq!(role["choices"][0]["delta"], serde_json::json!({"role": "assistant"}));

        let stop = serde_json::to_value(ChatCompletionChunk::stop("id", 1, "m")).unwrap();
        assert_eq!(stop["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(stop["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_keepalive_detection() {
        assert!(ChatCompletionChunk::content("id", 1, "m", "").is_keepalive());
        assert!(!ChatCompletionChunk::content("id", 1, "m", "x").is_keepalive());
        assert!(!ChatCompletionChunk::role("id", 1, "m").is_keepalive());
        assert!(!ChatCompletionChunk::stop("id", 1, "m").is_keepalive());
    }

    #[test]
    fn test_message_content_parts_keep_text_only() {
        let content: MessageContent = serde_json::from_value(serde_json::json!([
            {"type": "text", "text": "describe"},
            {"type": "image_url", "image_url": {"url": "http://x/a.png"}},
            {"type": "text", "text": "this"}
        ]))
        .unwrap();
        assert_eq!(content.to_text(), "describe\nthis");

        let MessageContent::Parts(parts) = content else {
            panic!("expected parts");
        };
        assert_eq!(parts[1].image_location(), Some("http://x/a.png"));
        assert_eq!(parts[0].image_location(), None);
    }

    #[test]
    fn test_bare_string_image_url() {
        let part: ContentPart = serde_json::from_value(serde_json::json!(
            {"type": "image_url", "image_url": "data:image/png;base64,AAAA"}
        ))
        .unwrap();
        assert_eq!(part.image_location(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_image_request_defaults_to_url() {
        let req: ImageGenerationRequest =
            serde_json::from_str(r#"{"model":"gpt-4","prompt":"a cat"}"#).unwrap();
        assert_eq!(req.response_format, ImageResponseFormat::Url);
    }
}
