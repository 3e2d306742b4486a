// Upstream event sources (chunked SSE and WebSocket push streams)
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Boxed byte stream of an upstream response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;
/// Boxed stream of WebSocket text messages.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One logical upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Payload of a `data:` frame, not yet parsed.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Pull-based access to upstream events, independent of transport.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` at end of stream.
    async fn next_event(&mut self) -> Result<Option<SourceEvent>>;

    /// Bytes left over after the stream ended that never formed a frame.
    fn take_trailing(&mut self) -> String;
}

fn heartbeat_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{6}$").expect("valid heartbeat regex")
    })
}

/// Splits raw SSE bytes into events. Frames end at a blank line.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: Vec<u8>,
    ready: VecDeque<SourceEvent>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and extract every complete frame.
    pub fn push(&mut self, chunk: &[u8]) {
        // CRLF and LF line endings are treated alike
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        while let Some(end) = find_blank_line(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let frame = String::from_utf8_lossy(&frame[..end]);
            if let Some(event) = parse_frame(&frame) {
                self.ready.push_back(event);
            }
        }
    }

    pub fn next_ready(&mut self) -> Option<SourceEvent> {
        self.ready.pop_front()
    }

    /// Whatever is buffered without a terminating blank line.
    ///
    /// A final `data:` frame that simply lacks its terminator still counts as
    /// an event and is queued instead.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
        if rest.trim_start().starts_with("data:") {
            if let Some(event) = parse_frame(rest.trim_end()) {
                self.ready.push_back(event);
            }
            return String::new();
        }
        rest
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Parse one frame. Pings, heartbeats and frames without data yield `None`.
fn parse_frame(frame: &str) -> Option<SourceEvent> {
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            if event.trim() == "ping" {
                return None;
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return Some(SourceEvent::Done);
    }
    if heartbeat_regex().is_match(trimmed) {
        debug!("Dropping heartbeat frame");
        return None;
    }
    Some(SourceEvent::Data(data))
}

/// Events read from a chunked SSE response body.
pub struct SseEventSource {
    body: ByteStream,
    framer: SseFramer,
    trailing: String,
    ended: bool,
}

impl SseEventSource {
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            framer: SseFramer::new(),
            trailing: String::new(),
            ended: false,
        }
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn next_event(&mut self) -> Result<Option<SourceEvent>> {
        loop {
            if let Some(event) = self.framer.next_ready() {
                return Ok(Some(event));
            }
            if self.ended {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.framer.push(&chunk),
                Some(Err(e)) => {
                    self.ended = true;
                    self.trailing = self.framer.finish();
                    return Err(e);
                }
                None => {
                    self.ended = true;
                    self.trailing = self.framer.finish();
                }
            }
        }
    }

    fn take_trailing(&mut self) -> String {
        std::mem::take(&mut self.trailing)
    }
}

/// JSON envelope of a push-stream message.
#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(default)]
    body: Option<String>,
}

/// Events carried by WebSocket messages whose `body` holds base64 SSE bytes.
pub struct WebSocketEventSource {
    messages: TextStream,
    framer: SseFramer,
    trailing: String,
    ended: bool,
}

impl WebSocketEventSource {
    pub fn new(messages: TextStream) -> Self {
        Self {
            messages,
            framer: SseFramer::new(),
            trailing: String::new(),
            ended: false,
        }
    }

    fn decode(message: &str) -> Result<Option<Vec<u8>>> {
        let envelope: SocketEnvelope = serde_json::from_str(message)?;
        let Some(body) = envelope.body else {
            return Ok(None);
        };
        STANDARD
            .decode(body.as_bytes())
            .map(Some)
            .map_err(|e| ProxyError::Socket(format!("invalid message body: {}", e)))
    }
}

#[async_trait]
impl EventSource for WebSocketEventSource {
    async fn next_event(&mut self) -> Result<Option<SourceEvent>> {
        loop {
            if let Some(event) = self.framer.next_ready() {
                return Ok(Some(event));
            }
            if self.ended {
                return Ok(None);
            }
            match self.messages.next().await {
                Some(Ok(message)) => match Self::decode(&message) {
                    Ok(Some(bytes)) => self.framer.push(&bytes),
                    Ok(None) => debug!("Socket message without body"),
                    Err(e) => warn!("Skipping undecodable socket message: {}", e),
                },
                Some(Err(e)) => {
                    self.ended = true;
                    self.trailing = self.framer.finish();
                    return Err(e);
                }
                None => {
                    self.ended = true;
                    self.trailing = self.framer.finish();
                }
            }
        }
    }

    fn take_trailing(&mut self) -> String {
        std::mem::take(&mut self.trailing)
    }
}
