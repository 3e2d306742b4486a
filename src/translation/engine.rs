// Per-turn translation of upstream message snapshots into text deltas
// Author: kelexine (https://github.com/kelexine)
//
// `TurnTranslator` owns all state of one turn and is driven event by event
// from the demultiplexer task. It never touches the output channel itself.

use super::accumulator::{PatternAccumulator, Segment};
use super::artifacts::TurnDeps;
use super::blocks::{BlockKind, BlockTracker, Body, EventClass};
use super::citation::{CitationMarkers, CitationResolver};
use super::images::{ImageExtractor, ImageMode, ImageRecord, IMAGE_DISPLAYED, IMAGE_PENDING_NOTICE};
use super::sandbox::{SandboxLinks, SandboxResolver};
use crate::models::upstream::{ConversationFrame, Role, UpstreamMessage};
use serde_json::Value;
use tracing::{debug, warn};

/// What one processed event contributes to the output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutput {
    /// Text to append to the stream. May be empty.
    pub delta: String,
    /// `model_slug` reported by the event.
    pub model_slug: Option<String>,
    /// Set on the event that latched the conversation id.
    pub latched_conversation_id: Option<String>,
}

/// Output of the end-of-stream pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishOutput {
    /// Flushed buffers and closing fences.
    pub delta: String,
    /// Fenced upstream error built from trailing bytes.
    pub error: Option<String>,
}

/// Result of a finished turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// Everything emitted as content, in order.
    pub text: String,
    pub conversation_id: Option<String>,
    /// Images collected in side-channel mode.
    pub images: Vec<ImageRecord>,
}

/// Fence an upstream error payload.
///
/// JSON payloads are searched for `detail.message`, a `detail` string or
/// `message`; anything else is fenced verbatim.
pub fn render_upstream_error(raw: &str) -> String {
    let raw = raw.trim();
    let message = serde_json::from_str::<Value>(raw).ok().and_then(|json| {
        let detail = json.get("detail");
        detail
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .or_else(|| detail.and_then(Value::as_str))
            .or_else(|| json.get("message").and_then(Value::as_str))
            .map(str::to_string)
    });
    format!("```\n{}\n```", message.as_deref().unwrap_or(raw))
}

/// Events the stream never shows: user/system echoes and finished snapshots,
/// except those authored by tools.
fn is_discarded(message: &UpstreamMessage) -> bool {
    let role = message.author.role;
    (role == Role::User || role == Role::System || message.is_finished()) && role != Role::Tool
}

pub struct TurnTranslator {
    deps: TurnDeps,
    blocks: BlockTracker,
    citations: PatternAccumulator<CitationMarkers>,
    citation_resolver: CitationResolver,
    sandbox: PatternAccumulator<SandboxLinks>,
    images: ImageExtractor,
    conversation_id: Option<String>,
    text: String,
}

impl TurnTranslator {
    pub fn new(deps: TurnDeps, image_mode: ImageMode) -> Self {
        let output = &deps.output;
        Self {
            blocks: BlockTracker::new(output.code_block_output),
            citation_resolver: CitationResolver::new(output.bing_reference_output),
            citations: PatternAccumulator::new(CitationMarkers),
            sandbox: PatternAccumulator::new(SandboxLinks),
            images: ImageExtractor::new(image_mode),
            conversation_id: None,
            text: String::new(),
            deps,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Cumulative output so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse and process the payload of one `data:` frame.
    ///
    /// Returns `None` for payloads that produce no event: malformed JSON,
    /// frames without a message, discarded and suppressed messages.
    pub async fn process_data(&mut self, data: &str) -> Option<EventOutput> {
        match serde_json::from_str::<ConversationFrame>(data) {
            Ok(frame) => self.process(frame).await,
            Err(e) => {
                warn!(
                    "Skipping unparsable upstream event: {} ({})",
                    e,
                    data.chars().take(200).collect::<String>()
                );
                None
            }
        }
    }

    pub async fn process(&mut self, frame: ConversationFrame) -> Option<EventOutput> {
        if let Some(error) = &frame.error {
            if !error.is_null() {
                warn!("Upstream event carries an error: {}", error);
            }
        }
        let message = frame.message?;
        if is_discarded(&message) {
            return None;
        }

        let mut latched = None;
        if self.conversation_id.is_none() {
            if let Some(id) = frame.conversation_id.filter(|id| !id.is_empty()) {
                debug!("Conversation id {}", id);
                self.conversation_id = Some(id.clone());
                latched = Some(id);
            }
        }

        let (leave_execution, close_code, body) = match self.blocks.classify(&message) {
            EventClass::Suppressed => {
                debug!("Suppressing image tool planning message");
                if latched.is_some() {
                    return Some(EventOutput {
                        latched_conversation_id: latched,
                        ..Default::default()
                    });
                }
                return None;
            }
            EventClass::Render {
                leave_execution,
                close_code,
                body,
            } => (leave_execution, close_code, body),
        };

        if !message.id.is_empty() {
            self.blocks.begin_message(&message.id);
        }
        let snapshot = message.content.text.as_deref().unwrap_or_default();

        let mut delta = String::new();
        if leave_execution {
            delta.push_str(&self.blocks.leave_execution());
            delta.push_str(&self.images.take_execution_image(&self.deps));
        }
        if close_code {
            delta.push_str(&self.blocks.close_code());
        }

        match body {
            Body::Code { open } => delta.push_str(&self.blocks.code(open, snapshot)),
            Body::Execution { open } => delta.push_str(&self.blocks.execution(open, snapshot)),
            Body::Images => {
                let has_prior_output = !self.text.is_empty() || !delta.is_empty();
                let rendered = self
                    .images
                    .render_pointers(&message, &self.deps, has_prior_output)
                    .await;
                delta.push_str(&rendered);
            }
            Body::OtherTool => {}
            Body::Text => {
                let text = self.text_delta(&message).await;
                delta.push_str(&text);
            }
        }

        if self.blocks.execution_snapshot().contains(IMAGE_DISPLAYED) {
            self.images.observe_execution(&message, &self.deps).await;
        }
        let delta = delta.replace(IMAGE_DISPLAYED, IMAGE_PENDING_NOTICE);

        self.blocks
            .commit(message.author.role, message.content.content_type);
        self.text.push_str(&delta);

        Some(EventOutput {
            delta,
            model_slug: message.metadata.model_slug.clone(),
            latched_conversation_id: latched,
        })
    }

    /// Plain-text delta routed through the citation and sandbox accumulators.
    async fn text_delta(&mut self, message: &UpstreamMessage) -> String {
        let delta = self.blocks.plain(&message.content.joined_parts());
        if delta.is_empty() {
            return delta;
        }

        let mut cited = String::new();
        for segment in self.citations.feed(&delta) {
            match segment {
                Segment::Passthrough(text) => cited.push_str(&text),
                Segment::Matched(marker) => cited.push_str(
                    &self
                        .citation_resolver
                        .resolve(&marker, &message.metadata.citations),
                ),
            }
        }

        let mut out = String::new();
        for segment in self.sandbox.feed(&cited) {
            match segment {
                Segment::Passthrough(text) => out.push_str(&text),
                Segment::Matched(marker) => {
                    let conversation_id = self.conversation_id.as_deref().unwrap_or_default();
                    let link = SandboxResolver::new(&self.deps)
                        .resolve(&marker, conversation_id, &message.id)
                        .await;
                    out.push_str(&link);
                }
            }
        }
        out
    }

    /// End-of-stream pass: release buffered text, close an open block and
    /// interpret trailing bytes as an upstream error.
    pub async fn finish(&mut self, trailing: &str) -> FinishOutput {
        let mut delta = String::new();
        if let Some(rest) = self.sandbox.flush() {
            debug!("Flushing incomplete sandbox reference {:?}", rest);
            delta.push_str(&rest);
        }
        if let Some(rest) = self.citations.flush() {
            debug!("Flushing incomplete citation marker {:?}", rest);
            delta.push_str(&rest);
        }

        match self.blocks.previous() {
            Some(BlockKind::Code) => delta.push_str(&self.blocks.close_code()),
            Some(BlockKind::ExecutionOutput) => {
                delta.push_str(&self.blocks.leave_execution());
                delta.push_str(&self.images.take_execution_image(&self.deps));
            }
            _ => {}
        }
        self.text.push_str(&delta);

        let error = if trailing.trim().is_empty() {
            None
        } else {
            warn!("Upstream stream ended with non-event bytes: {}", trailing.trim());
            Some(render_upstream_error(trailing))
        };

        FinishOutput { delta, error }
    }

    /// Record text emitted outside of [`TurnTranslator::process`], such as
    /// error chunks.
    pub fn append_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn into_summary(self) -> TurnSummary {
        TurnSummary {
            text: self.text,
            conversation_id: self.conversation_id,
            images: self.images.into_records(),
        }
    }
}
