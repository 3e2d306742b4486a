// Buffering of inline markers split across stream fragments
// Author: kelexine (https://github.com/kelexine)

use tracing::debug;

/// Buffers longer than this are flushed verbatim.
pub const MAX_PATTERN_BUFFER: usize = 4096;

/// Outcome of validating an accumulated buffer against a marker grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// The buffer starts with a complete marker of this many bytes.
    Complete(usize),
    /// The buffer is a proper prefix of some marker.
    Partial,
    Invalid,
}

/// A family of inline markers (citations, sandbox links, ...).
pub trait PatternFamily {
    /// Byte offset of the first character that may start a marker.
    fn trigger(&self, text: &str) -> Option<usize>;

    /// Validate a buffer that starts at a trigger.
    fn scan(&self, buffer: &str) -> Scan;
}

/// Piece of output produced by [`PatternAccumulator::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text that is known not to be part of a marker.
    Passthrough(String),
    /// A complete marker, to be handed to a resolver.
    Matched(String),
}

/// Holds back text that might be the beginning of a marker until it can be
/// classified. Nothing is ever dropped: every byte fed in comes back out,
/// either as passthrough text, as part of a matched marker, or on flush.
#[derive(Debug)]
pub struct PatternAccumulator<F> {
    family: F,
    buffer: String,
    accumulating: bool,
}

impl<F: PatternFamily> PatternAccumulator<F> {
    pub fn new(family: F) -> Self {
        Self {
            family,
            buffer: String::new(),
            accumulating: false,
        }
    }

    pub fn is_accumulating(&self) -> bool {
        self.accumulating
    }

    /// Feed the next fragment of text.
    pub fn feed(&mut self, fragment: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut pending = fragment.to_string();

        loop {
            if self.accumulating {
                self.buffer.push_str(&pending);
            } else {
                match self.family.trigger(&pending) {
                    Some(idx) => {
                        push_text(&mut segments, &pending[..idx]);
                        self.buffer = pending[idx..].to_string();
                        self.accumulating = true;
                    }
                    None => {
                        push_text(&mut segments, &pending);
                        break;
                    }
                }
            }
            pending.clear();

            let scan = if self.buffer.len() > MAX_PATTERN_BUFFER {
                debug!(
                    "Pattern buffer exceeded {} bytes, flushing",
                    MAX_PATTERN_BUFFER
                );
                Scan::Invalid
            } else {
                self.family.scan(&self.buffer)
            };

            match scan {
                Scan::Complete(len) => {
                    let buffer = std::mem::take(&mut self.buffer);
                    self.accumulating = false;
                    segments.push(Segment::Matched(buffer[..len].to_string()));
                    pending = buffer[len..].to_string();
                    if pending.is_empty() {
                        break;
                    }
                }
                Scan::Partial => break,
                Scan::Invalid => {
                    let buffer = std::mem::take(&mut self.buffer);
                    self.accumulating = false;
                    // Re-scan everything after the trigger character for a new marker
                    let first = buffer.chars().next().map(char::len_utf8).unwrap_or(0);
                    push_text(&mut segments, &buffer[..first]);
                    pending = buffer[first..].to_string();
                    if pending.is_empty() {
                        break;
                    }
                }
            }
        }

        segments
    }

    /// Release whatever is buffered, verbatim.
    pub fn flush(&mut self) -> Option<String> {
        self.accumulating = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Append passthrough text, merging with a preceding passthrough segment.
fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Passthrough(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Passthrough(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `<n>` markers for exercising the accumulator on its own.
    struct Angle;

    impl PatternFamily for Angle {
        fn trigger(&self, text: &str) -> Option<usize> {
            text.find('<')
        }

        fn scan(&self, buffer: &str) -> Scan {
            let rest = &buffer[1..];
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            match rest[digits..].chars().next() {
                None => Scan::Partial,
                Some('>') if digits > 0 => Scan::Complete(1 + digits + 1),
                _ => Scan::Invalid,
            }
        }
    }

    fn text(s: &str) -> Segment {
        Segment::Passthrough(s.to_string())
    }

    fn matched(s: &str) -> Segment {
        Segment::Matched(s.to_string())
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut acc = PatternAccumulator::new(Angle);
        assert_eq!(acc.feed("hello"), vec![text("hello")]);
        assert!(!acc.is_accumulating());
    }

    #[test]
    fn test_marker_split_across_fragments() {
        let mut acc = PatternAccumulator::new(Angle);
        assert_eq!(acc.feed("see <1"), vec![text("see ")]);
        assert!(acc.is_accumulating());
        assert_eq!(acc.feed("2"), vec![]);
        assert_eq!(acc.feed("> done"), vec![matched("<12>"), text(" done")]);
        assert!(!acc.is_accumulating());
    }

    #[test]
    fn test_remainder_is_refed() {
        let mut acc = PatternAccumulator::new(Angle);
        assert_eq!(
            acc.feed("<1><2> and <3"),
            vec![matched("<1>"), matched("<2>"), text(" and ")]
        );
        assert_eq!(acc.flush(), Some("<3".to_string()));
    }

    #[test]
    fn test_invalid_buffer_is_released_and_rescanned() {
        let mut acc = PatternAccumulator::new(Angle);
        assert_eq!(acc.feed("a <"), vec![text("a ")]);
        assert_eq!(acc.feed("x<4>"), vec![text("<x"), matched("<4>")]);
    }

    #[test]
    fn test_safety_cap() {
        let mut acc = PatternAccumulator::new(Angle);
        acc.feed("<");
        let long = "1".repeat(MAX_PATTERN_BUFFER + 1);
        let segments = acc.feed(&long);
        let joined: String = segments
            .iter()
            .map(|s| match s {
                Segment::Passthrough(t) | Segment::Matched(t) => t.as_str(),
            })
            .collect();
        assert_eq!(joined, format!("<{}", long));
        assert!(!acc.is_accumulating());
    }

    #[test]
    fn test_flush_when_idle() {
        let mut acc = PatternAccumulator::new(Angle);
        acc.feed("nothing pending");
        assert_eq!(acc.flush(), None);
    }
}
