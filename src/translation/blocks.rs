// Block classification and fencing
// Author: kelexine (https://github.com/kelexine)
//
// Every upstream event is classified once into an `EventClass`. The tracker
// then renders fences for the transitions it describes and keeps the snapshot
// runs of code and execution output in step, even when code output is hidden.

use super::differ::{RunKind, TextRunDiffer};
use crate::models::upstream::{ContentType, Role, UpstreamMessage};

/// Fence emitted when a code or execution-output block opens.
pub const FENCE_OPEN: &str = "\n```\n";
/// Fence emitted when a code or execution-output block closes.
pub const FENCE_CLOSE: &str = "\n```\n";
/// Header in front of a code-execution result block.
pub const RESULT_HEADER: &str = "`Result:` \n```\n";

/// Author name of the code-execution tool.
pub const EXECUTION_TOOL: &str = "python";
/// Author name of the image-generation tool.
pub const IMAGE_TOOL: &str = "dalle.text2im";

/// The kind of block the output is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Code,
    ExecutionOutput,
    Other,
}

impl From<ContentType> for BlockKind {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Text | ContentType::MultimodalText => BlockKind::Text,
            ContentType::Code => BlockKind::Code,
            ContentType::ExecutionOutput => BlockKind::ExecutionOutput,
            ContentType::Other => BlockKind::Other,
        }
    }
}

/// What the body of an event contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    /// Code snapshot; `open` when a fence must be opened first.
    Code { open: bool },
    /// Code-execution tool output; `open` when the result block starts.
    Execution { open: bool },
    /// Parts carry image asset pointers.
    Images,
    /// Tool output that is never shown.
    OtherTool,
    /// Plain text parts, routed through the pattern accumulators.
    Text,
}

/// Closed set of transitions one event can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Internal planning message of the image tool. Dropped without a trace.
    Suppressed,
    Render {
        leave_execution: bool,
        close_code: bool,
        body: Body,
    },
}

/// Tracks the committed block kind and renders fenced code/execution deltas.
#[derive(Debug)]
pub struct BlockTracker {
    differ: TextRunDiffer,
    last: Option<BlockKind>,
    code_output: bool,
}

impl BlockTracker {
    pub fn new(code_output: bool) -> Self {
        Self {
            differ: TextRunDiffer::new(),
            last: None,
            code_output,
        }
    }

    /// Last committed block kind.
    pub fn previous(&self) -> Option<BlockKind> {
        self.last
    }

    /// Classify an event against the committed block kind.
    pub fn classify(&self, message: &UpstreamMessage) -> EventClass {
        let role = message.author.role;
        let name = message.author_name();
        let current = message.content.content_type.map(BlockKind::from);
        let has_images = !message.content.image_pointers().is_empty();
        let is_execution_tool = role == Role::Tool && name == EXECUTION_TOOL;

        if role == Role::Tool && name == IMAGE_TOOL && !has_images {
            return EventClass::Suppressed;
        }

        let previous = self.last;
        let declared = current.is_some();
        let leave_execution = declared
            && previous == Some(BlockKind::ExecutionOutput)
            && !is_execution_tool;
        let close_code =
            declared && previous == Some(BlockKind::Code) && current != Some(BlockKind::Code);

        let body = if has_images {
            Body::Images
        } else if current == Some(BlockKind::Code) {
            Body::Code {
                open: previous != Some(BlockKind::Code),
            }
        } else if is_execution_tool && declared {
            Body::Execution {
                open: previous != Some(BlockKind::ExecutionOutput),
            }
        } else if role == Role::Tool && declared {
            Body::OtherTool
        } else {
            Body::Text
        };

        EventClass::Render {
            leave_execution,
            close_code,
            body,
        }
    }

    /// Restart snapshot runs when the upstream message changes.
    pub fn begin_message(&mut self, message_id: &str) {
        self.differ.begin_message(message_id);
    }

    /// Closing fence of a result block.
    ///
    /// The event that leaves the block belongs to another message, so its
    /// text is never diffed against the execution run.
    pub fn leave_execution(&mut self) -> String {
        self.differ.reset(RunKind::Execution);
        if self.code_output {
            FENCE_CLOSE.to_string()
        } else {
            String::new()
        }
    }

    /// Closing fence of a code block.
    pub fn close_code(&mut self) -> String {
        self.differ.reset(RunKind::Code);
        if self.code_output {
            FENCE_CLOSE.to_string()
        } else {
            String::new()
        }
    }

    /// Code delta, preceded by an opening fence when the block starts.
    pub fn code(&mut self, open: bool, snapshot: &str) -> String {
        let delta = self.differ.diff(RunKind::Code, snapshot);
        if !self.code_output {
            return String::new();
        }
        if open {
            format!("{}{}", FENCE_OPEN, delta)
        } else {
            delta
        }
    }

    /// Execution output delta, preceded by the result header when the block starts.
    pub fn execution(&mut self, open: bool, snapshot: &str) -> String {
        let delta = self.differ.diff(RunKind::Execution, snapshot);
        if !self.code_output {
            return String::new();
        }
        if open {
            format!("{}{}", RESULT_HEADER, delta)
        } else {
            delta
        }
    }

    /// Plain-text delta of the joined parts.
    pub fn plain(&mut self, snapshot: &str) -> String {
        self.differ.diff(RunKind::Plain, snapshot)
    }

    /// Execution output seen so far in the current result block.
    pub fn execution_snapshot(&self) -> &str {
        self.differ.last(RunKind::Execution)
    }

    /// Commit the block kind of a processed event.
    ///
    /// Only events that declare a content type move the state, and user
    /// echoes never do.
    pub fn commit(&mut self, role: Role, content_type: Option<ContentType>) {
        if role == Role::User {
            return;
        }
        if let Some(content_type) = content_type {
            self.last = Some(content_type.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::{Author, MessageBody, Part};

    fn message(role: Role, name: Option<&str>, content_type: Option<ContentType>) -> UpstreamMessage {
        UpstreamMessage {
            id: "m".to_string(),
            author: Author {
                role,
                name: name.map(str::to_string),
            },
            content: MessageBody {
                content_type,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_code_open_then_continue() {
        let mut tracker = BlockTracker::new(true);
        let event = message(Role::Assistant, None, Some(ContentType::Code));
        assert_eq!(
            tracker.classify(&event),
            EventClass::Render {
                leave_execution: false,
                close_code: false,
                body: Body::Code { open: true }
            }
        );
        assert_eq!(tracker.code(true, "a=1"), "\n```\na=1");
        tracker.commit(Role::Assistant, Some(ContentType::Code));

        assert_eq!(
            tracker.classify(&event),
            EventClass::Render {
                leave_execution: false,
                close_code: false,
                body: Body::Code { open: false }
            }
        );
        assert_eq!(tracker.code(false, "a=1\nb=2"), "\nb=2");
    }

    #[test]
    fn test_text_after_code_closes_fence() {
        let mut tracker = BlockTracker::new(true);
        tracker.commit(Role::Assistant, Some(ContentType::Code));
        let event = message(Role::Assistant, None, Some(ContentType::Text));
        assert_eq!(
            tracker.classify(&event),
            EventClass::Render {
                leave_execution: false,
                close_code: true,
                body: Body::Text
            }
        );
        assert_eq!(tracker.close_code(), FENCE_CLOSE);
    }

    #[test]
    fn test_execution_tool_opens_result_block() {
        let mut tracker = BlockTracker::new(true);
        tracker.commit(Role::Assistant, Some(ContentType::Code));
        let event = message(Role::Tool, Some("python"), Some(ContentType::ExecutionOutput));
        assert_eq!(
            tracker.classify(&event),
            EventClass::Render {
                leave_execution: false,
                close_code: true,
                body: Body::Execution { open: true }
            }
        );
        assert_eq!(tracker.execution(true, "2"), "`Result:` \n```\n2");
        tracker.commit(Role::Tool, Some(ContentType::ExecutionOutput));

        let next = message(Role::Assistant, None, Some(ContentType::Text));
        assert_eq!(
            tracker.classify(&next),
            EventClass::Render {
                leave_execution: true,
                close_code: false,
                body: Body::Text
            }
        );
        assert_eq!(tracker.leave_execution(), FENCE_CLOSE);
    }

    #[test]
    fn test_image_tool_planning_is_suppressed() {
        let tracker = BlockTracker::new(true);
        let event = message(Role::Tool, Some("dalle.text2im"), Some(ContentType::Text));
        assert_eq!(tracker.classify(&event), EventClass::Suppressed);
    }

    #[test]
    fn test_image_tool_with_pointer_is_rendered() {
        let tracker = BlockTracker::new(true);
        let mut event = message(Role::Tool, Some("dalle.text2im"), Some(ContentType::MultimodalText));
        event.content.parts = vec![Part::Asset(crate::models::upstream::AssetPart {
            content_type: "image_asset_pointer".to_string(),
            asset_pointer: Some("file-service://file-1".to_string()),
        })];
        assert!(matches!(
            tracker.classify(&event),
            EventClass::Render { body: Body::Images, .. }
        ));
    }

    #[test]
    fn test_other_tools_are_hidden() {
        let tracker = BlockTracker::new(true);
        let event = message(Role::Tool, Some("browser"), Some(ContentType::Other));
        assert!(matches!(
            tracker.classify(&event),
            EventClass::Render { body: Body::OtherTool, .. }
        ));
    }

    #[test]
    fn test_disabled_code_output_advances_state() {
        let mut tracker = BlockTracker::new(false);
        assert_eq!(tracker.code(true, "a=1"), "");
        assert_eq!(tracker.code(false, "a=1\nb=2"), "");
        assert_eq!(tracker.close_code(), "");

        let mut enabled = BlockTracker::new(true);
        enabled.code(true, "a=1");
        assert_eq!(enabled.code(false, "a=1\nb=2"), "\nb=2");
    }

    #[test]
    fn test_user_and_untyped_events_do_not_commit() {
        let mut tracker = BlockTracker::new(true);
        tracker.commit(Role::Assistant, Some(ContentType::Code));
        tracker.commit(Role::User, Some(ContentType::Text));
        tracker.commit(Role::Assistant, None);
        assert_eq!(tracker.previous(), Some(BlockKind::Code));
    }
}
