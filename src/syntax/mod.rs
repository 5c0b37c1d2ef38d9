//! TextMate grammar tokenization
//!
//! Provides incremental, line-oriented tokenization with:
//! - Grammar discovery from extension directories
//! - Scope resolution from file names, extensions and first lines
//! - Per-buffer state so edits only re-tokenize from the first changed line
//!
//! ## Architecture
//!
//! ```text
//! GrammarRegistry (package.json → grammar files, lazily compiled)
//!        → Tokenizer (per-buffer lines + StateStack per line)
//!        → LineTokenizer (one line, onig regexes) → Token stream
//! ```

mod grammar;
mod line;
mod registry;
mod state;
mod tokenizer;

use serde::Serialize;

pub use grammar::Grammar;
pub use registry::{GrammarRegistry, Language};
pub use state::{StateStack, MAX_STACK_DEPTH};
pub use tokenizer::{ParseResult, Tokenizer};

/// Grammar identifier such as `source.rust`
pub type ScopeName = String;

/// A run of text on one line sharing the same scopes.
///
/// Columns and lengths count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Outermost first; the first entry is the grammar's scope name
    pub scopes: Vec<String>,
    /// 0-based line
    pub line: usize,
    /// 0-based start column
    pub column: usize,
    pub length: usize,
}

impl Token {
    /// Exclusive end column
    #[inline]
    pub fn end_column(&self) -> usize {
        self.column + self.length
    }

    /// Innermost scope
    pub fn scope(&self) -> Option<&str> {
        self.scopes.last().map(String::as_str)
    }
}
