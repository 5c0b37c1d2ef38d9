//! Grammar stack state carried across line boundaries

use super::grammar::{Grammar, RuleId};

/// Maximum nesting of open regions before tokenization is abandoned
pub const MAX_STACK_DEPTH: usize = 512;

/// One open region (begin/end or begin/while)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub rule: RuleId,
    /// Scopes for the region's delimiters: parent content scopes + `name`
    pub name_scopes: Vec<String>,
    /// Scopes for the region's body: `name_scopes` + `contentName`
    pub content_scopes: Vec<String>,
    /// End/while pattern with back-references already substituted
    pub resolved: Option<String>,
    /// Byte offset where the region began; only set on the line it began
    pub enter_pos: Option<usize>,
}

/// Tokenizer state at a line boundary.
///
/// The bottom frame is always the grammar root and is never popped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStack {
    pub(crate) frames: Vec<Frame>,
}

impl StateStack {
    /// State before the first line of a buffer
    pub fn initial(grammar: &Grammar) -> Self {
        let scopes = vec![grammar.scope_name().to_owned()];
        Self {
            frames: vec![Frame {
                rule: grammar.root(),
                name_scopes: scopes.clone(),
                content_scopes: scopes,
                resolved: None,
                enter_pos: None,
            }],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Scopes that apply to plain text at this point
    pub fn scopes(&self) -> &[String] {
        &self.top().content_scopes
    }

    pub(crate) fn top(&self) -> &Frame {
        // Never empty: the root frame cannot be popped
        &self.frames[self.frames.len() - 1]
    }

    /// Returns false if the stack is already at `MAX_STACK_DEPTH`
    pub(crate) fn push(&mut self, frame: Frame) -> bool {
        if self.frames.len() >= MAX_STACK_DEPTH {
            return false;
        }
        self.frames.push(frame);
        true
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub(crate) fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    /// Forget same-line bookkeeping before the state is stored
    pub(crate) fn end_line(&mut self) {
        for frame in &mut self.frames {
            frame.enter_pos = None;
        }
    }
}
