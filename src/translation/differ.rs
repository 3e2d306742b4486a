// Cumulative snapshot → delta differencing
// Author: kelexine (https://github.com/kelexine)

use tracing::debug;

/// Logical sub-streams the upstream snapshots independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Plain,
    Code,
    Execution,
}

impl RunKind {
    fn slot(self) -> usize {
        match self {
            RunKind::Plain => 0,
            RunKind::Code => 1,
            RunKind::Execution => 2,
        }
    }
}

/// Turns successive "full text so far" snapshots into the newly appended suffix.
///
/// Runs are scoped to one upstream message: [`TextRunDiffer::begin_message`]
/// restarts every run when the message id changes.
#[derive(Debug, Default)]
pub struct TextRunDiffer {
    last: [String; 3],
    message_id: Option<String>,
}

impl TextRunDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note the message the following snapshots belong to.
    pub fn begin_message(&mut self, message_id: &str) {
        if self.message_id.as_deref() == Some(message_id) {
            return;
        }
        if self.message_id.is_some() {
            debug!("New upstream message {}, restarting snapshot runs", message_id);
        }
        self.message_id = Some(message_id.to_string());
        for run in &mut self.last {
            run.clear();
        }
    }

    /// Return the part of `snapshot` not seen before for `kind`.
    ///
    /// Empty snapshots never advance the run. A snapshot that does not extend
    /// the previous one resets the run and yields nothing.
    pub fn diff(&mut self, kind: RunKind, snapshot: &str) -> String {
        let last = &mut self.last[kind.slot()];
        if snapshot.is_empty() {
            return String::new();
        }
        match snapshot.strip_prefix(last.as_str()) {
            Some(suffix) => {
                let delta = suffix.to_string();
                last.clear();
                last.push_str(snapshot);
                delta
            }
            None => {
                debug!(
                    "Snapshot regression on {:?} run ({} -> {} bytes), resetting",
                    kind,
                    last.len(),
                    snapshot.len()
                );
                last.clear();
                last.push_str(snapshot);
                String::new()
            }
        }
    }

    /// Forget the last snapshot of `kind`.
    pub fn reset(&mut self, kind: RunKind) {
        self.last[kind.slot()].clear();
    }

    pub fn last(&self, kind: RunKind) -> &str {
        &self.last[kind.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_suffix() {
        let mut differ = TextRunDiffer::new();
        assert_eq!(differ.diff(RunKind::Plain, "Hello"), "Hello");
        assert_eq!(differ.diff(RunKind::Plain, "Hello world"), " world");
    }

    #[test]
    fn test_repeated_snapshot_is_empty() {
        let mut differ = TextRunDiffer::new();
        differ.diff(RunKind::Code, "a=1");
        assert_eq!(differ.diff(RunKind::Code, "a=1"), "");
    }

    #[test]
    fn test_empty_snapshot_does_not_reset() {
        let mut differ = TextRunDiffer::new();
        differ.diff(RunKind::Plain, "abc");
        assert_eq!(differ.diff(RunKind::Plain, ""), "");
        assert_eq!(differ.diff(RunKind::Plain, "abcd"), "d");
    }

    #[test]
    fn test_regression_resets_without_delta() {
        let mut differ = TextRunDiffer::new();
        differ.diff(RunKind::Plain, "Hello world");
        assert_eq!(differ.diff(RunKind::Plain, "Hello"), "");
        assert_eq!(differ.last(RunKind::Plain), "Hello");
        assert_eq!(differ.diff(RunKind::Plain, "Hello there"), " there");
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut differ = TextRunDiffer::new();
        differ.diff(RunKind::Plain, "text");
        assert_eq!(differ.diff(RunKind::Code, "print(1)"), "print(1)");
        assert_eq!(differ.diff(RunKind::Plain, "text!"), "!");
    }

    #[test]
    fn test_new_message_restarts_runs() {
        let mut differ = TextRunDiffer::new();
        differ.begin_message("m1");
        differ.diff(RunKind::Plain, "A long first answer");
        differ.begin_message("m1");
        assert_eq!(differ.diff(RunKind::Plain, "A long first answer."), ".");

        differ.begin_message("m2");
        assert_eq!(differ.diff(RunKind::Plain, "Short"), "Short");
    }

    #[test]
    fn test_multibyte_snapshots() {
        let mut differ = TextRunDiffer::new();
        assert_eq!(differ.diff(RunKind::Plain, "你好"), "你好");
        assert_eq!(differ.diff(RunKind::Plain, "你好，世界"), "，世界");
    }
}
