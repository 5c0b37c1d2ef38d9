//! Highlight applier
//!
//! Turns tokens into host highlight marks and remembers which marks are
//! applied per buffer, so they can be removed by line range.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::Rule;
use crate::error::SyntaxError;
use crate::host::{BufferId, Host};
use crate::syntax::Token;

/// One highlight on a single line, in char columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightMark {
    pub line: usize,
    pub start_col: usize,
    /// Exclusive
    pub end_col: usize,
    pub group: String,
}

/// Inclusive line range; `end: None` runs to the end of the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl LineRange {
    /// Every line of the buffer
    pub const ALL: LineRange = LineRange {
        start: 0,
        end: None,
    };

    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// `start..=end`
    pub fn between(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn starting_at(start: usize) -> Self {
        Self { start, end: None }
    }

    #[inline]
    pub fn contains(&self, line: usize) -> bool {
        line >= self.start && self.end.map_or(true, |end| line <= end)
    }

    pub fn is_empty(&self) -> bool {
        self.end.is_some_and(|end| end < self.start)
    }
}

/// Per-buffer store of applied marks, keyed by line
#[derive(Debug, Default)]
pub struct HighlightApplier {
    buffers: HashMap<BufferId, BTreeMap<usize, Vec<HighlightMark>>>,
}

impl HighlightApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mark for every token whose scopes resolve to a group in `rule`.
    ///
    /// All marks go to the host in one call; nothing is sent when no token
    /// produces a mark. Returns the number of marks added.
    pub fn set<'a>(
        &mut self,
        host: &mut dyn Host,
        buffer: BufferId,
        rule: &Rule,
        tokens: impl IntoIterator<Item = &'a Token>,
    ) -> Result<usize, SyntaxError> {
        let marks: Vec<HighlightMark> = tokens
            .into_iter()
            .filter_map(|token| {
                rule.group_for(&token.scopes).map(|group| HighlightMark {
                    line: token.line,
                    start_col: token.column,
                    end_col: token.end_column(),
                    group: group.to_owned(),
                })
            })
            .collect();

        if marks.is_empty() {
            return Ok(0);
        }

        host.add_highlight_marks(buffer, &marks)?;
        tracing::trace!("Added {} marks to buffer {}", marks.len(), buffer);

        let count = marks.len();
        let store = self.buffers.entry(buffer).or_default();
        for mark in marks {
            store.entry(mark.line).or_default().push(mark);
        }
        Ok(count)
    }

    /// Remove all marks on `buffer` whose line falls in `range`
    pub fn undecorate(
        &mut self,
        host: &mut dyn Host,
        buffer: BufferId,
        range: LineRange,
    ) -> Result<(), SyntaxError> {
        host.remove_highlight_marks(buffer, range)?;
        tracing::trace!(
            "Removed marks from buffer {} lines {}..{:?}",
            buffer,
            range.start,
            range.end
        );

        if let Some(store) = self.buffers.get_mut(&buffer) {
            store.retain(|line, _| !range.contains(*line));
            if store.is_empty() {
                self.buffers.remove(&buffer);
            }
        }
        Ok(())
    }

    /// Marks currently applied to `buffer`, in line order
    pub fn marks(&self, buffer: BufferId) -> impl Iterator<Item = &HighlightMark> {
        self.buffers
            .get(&buffer)
            .into_iter()
            .flat_map(|store| store.values().flatten())
    }

    pub fn mark_count(&self, buffer: BufferId) -> usize {
        self.buffers
            .get(&buffer)
            .map_or(0, |store| store.values().map(Vec::len).sum())
    }

    /// Drop the mark store of a closed buffer
    pub fn forget(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{HostCall, RecordingHost};

    fn token(line: usize, column: usize, length: usize, scopes: &[&str]) -> Token {
        Token {
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            line,
            column,
            length,
        }
    }

    fn rule() -> Rule {
        Rule::new([("comment", "Comment"), ("keyword", "Keyword")])
    }

    #[test]
    fn test_line_range() {
        let r = LineRange::between(2, 4);
        assert!(!r.contains(1));
        assert!(r.contains(2));
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert!(LineRange::starting_at(3).contains(10_000));
        assert!(LineRange::between(5, 4).is_empty());
        assert!(!LineRange::ALL.is_empty());
    }

    #[test]
    fn test_set_sends_one_batch() {
        let mut host = RecordingHost::new();
        let mut applier = HighlightApplier::new();
        let tokens = vec![
            token(0, 0, 2, &["source.t", "keyword.control.t"]),
            token(0, 2, 1, &["source.t"]),
            token(1, 0, 5, &["source.t", "comment.line.t"]),
        ];

        let count = applier.set(&mut host, BufferId(1), &rule(), &tokens).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            host.calls,
            vec![HostCall::AddMarks {
                buffer: BufferId(1),
                marks: vec![
                    HighlightMark {
                        line: 0,
                        start_col: 0,
                        end_col: 2,
                        group: "Keyword".into(),
                    },
                    HighlightMark {
                        line: 1,
                        start_col: 0,
                        end_col: 5,
                        group: "Comment".into(),
                    },
                ],
            }]
        );
        assert_eq!(applier.mark_count(BufferId(1)), 2);
    }

    #[test]
    fn test_set_empty_is_noop() {
        let mut host = RecordingHost::new();
        let mut applier = HighlightApplier::new();

        assert_eq!(applier.set(&mut host, BufferId(1), &rule(), std::iter::empty()).unwrap(), 0);
        let unmatched = vec![token(0, 0, 3, &["source.t"])];
        assert_eq!(
            applier.set(&mut host, BufferId(1), &rule(), &unmatched).unwrap(),
            0
        );
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_undecorate_range() {
        let mut host = RecordingHost::new();
        let mut applier = HighlightApplier::new();
        let tokens: Vec<_> = (0..5)
            .map(|line| token(line, 0, 1, &["source.t", "comment.t"]))
            .collect();
        applier.set(&mut host, BufferId(7), &rule(), &tokens).unwrap();

        applier
            .undecorate(&mut host, BufferId(7), LineRange::between(1, 3))
            .unwrap();
        let lines: Vec<_> = applier.marks(BufferId(7)).map(|m| m.line).collect();
        assert_eq!(lines, vec![0, 4]);

        applier
            .undecorate(&mut host, BufferId(7), LineRange::ALL)
            .unwrap();
        assert_eq!(applier.mark_count(BufferId(7)), 0);
        assert_eq!(host.removals().count(), 2);
    }

    #[test]
    fn test_host_failure_is_apply_error() {
        let mut host = RecordingHost::failing("buffer is gone");
        let mut applier = HighlightApplier::new();
        let tokens = vec![token(0, 0, 2, &["source.t", "keyword.t"])];

        let err = applier
            .set(&mut host, BufferId(1), &rule(), &tokens)
            .unwrap_err();
        assert!(matches!(err, SyntaxError::HighlightApply(_)));
        assert_eq!(applier.mark_count(BufferId(1)), 0);
    }

    #[test]
    fn test_forget() {
        let mut host = RecordingHost::new();
        let mut applier = HighlightApplier::new();
        let tokens = vec![token(0, 0, 2, &["keyword.t"])];
        applier.set(&mut host, BufferId(1), &rule(), &tokens).unwrap();
        applier.forget(BufferId(1));
        assert_eq!(applier.marks(BufferId(1)).count(), 0);
    }
}
