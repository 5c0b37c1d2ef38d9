//! Incremental tokenizer
//!
//! Owns per-buffer parse state: the last line snapshot, the grammar stack
//! at every line boundary, and the tokens of every line. A parse resumes
//! from the first line that differs from the snapshot and re-tokenizes
//! through the end of the buffer.

use std::collections::HashMap;
use std::path::Path;

use super::line::{LineTokenizer, Span};
use super::registry::GrammarRegistry;
use super::state::StateStack;
use super::{ScopeName, Token};
use crate::error::SyntaxError;
use crate::host::BufferId;

/// Cached parse state for a buffer (enables incremental parsing)
struct BufferState {
    /// Grammar the state was produced with
    scope_name: ScopeName,
    lines: Vec<String>,
    /// `stacks[i]` is the grammar state at the start of line `i`;
    /// one longer than `lines`
    stacks: Vec<StateStack>,
    /// Tokens per line
    tokens: Vec<Vec<Token>>,
}

/// Result of a parse request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    /// Full token stream for the buffer, in line then column order
    pub tokens: Vec<Token>,
    /// First line whose tokens may differ from the previous parse
    /// (inclusive), or `None` when nothing changed
    pub change_start: Option<usize>,
}

impl ParseResult {
    /// Tokens on lines `from..=to`
    pub fn tokens_between(&self, from: usize, to: usize) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(move |t| from <= t.line && t.line <= to)
    }
}

/// Incremental tokenizer over a grammar registry
pub struct Tokenizer {
    registry: GrammarRegistry,
    buffers: HashMap<BufferId, BufferState>,
}

impl Tokenizer {
    pub fn new(registry: GrammarRegistry) -> Self {
        Self {
            registry,
            buffers: HashMap::new(),
        }
    }

    /// Resolve the grammar scope for a file path
    pub fn scope_name(&mut self, path: &Path) -> Result<ScopeName, SyntaxError> {
        self.registry.scope_name(path)
    }

    /// Whether parse state exists for `buffer`
    pub fn has_state(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer)
    }

    /// Discard the parse state of a closed buffer
    pub fn forget(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            tracing::debug!("Dropped parse state for buffer {}", buffer);
        }
    }

    /// Tokenize `lines` for `buffer`, reusing the previous parse up to the
    /// first changed line.
    ///
    /// On error the stored state is left as it was, so a later call can
    /// recover from the last good parse.
    pub fn parse(
        &mut self,
        buffer: BufferId,
        scope_name: &str,
        lines: &[String],
    ) -> Result<ParseResult, SyntaxError> {
        let grammar = self.registry.load(scope_name)?;

        let previous = self
            .buffers
            .get(&buffer)
            .filter(|state| state.scope_name == scope_name);

        let (start, mut stacks, mut line_tokens) = match previous {
            None => (0, vec![StateStack::initial(&grammar)], Vec::new()),
            Some(prev) => match first_difference(&prev.lines, lines) {
                None => {
                    tracing::trace!("Buffer {} unchanged, reusing tokens", buffer);
                    return Ok(ParseResult {
                        tokens: prev.tokens.iter().flatten().cloned().collect(),
                        change_start: None,
                    });
                }
                Some(start) => (
                    start,
                    prev.stacks[..=start].to_vec(),
                    prev.tokens[..start].to_vec(),
                ),
            },
        };

        tracing::debug!(
            "Tokenizing buffer {} from line {} ({} lines)",
            buffer,
            start,
            lines.len()
        );

        let mut stack = stacks[start].clone();
        let mut tokenizer = LineTokenizer::new(&grammar);
        for (line_no, line) in lines.iter().enumerate().skip(start) {
            let spans = tokenizer.tokenize_line(line_no, line, &mut stack)?;
            line_tokens.push(to_tokens(line_no, line, spans));
            stacks.push(stack.clone());
        }

        let tokens = line_tokens.iter().flatten().cloned().collect();
        self.buffers.insert(
            buffer,
            BufferState {
                scope_name: scope_name.to_owned(),
                lines: lines.to_vec(),
                stacks,
                tokens: line_tokens,
            },
        );

        Ok(ParseResult {
            tokens,
            change_start: Some(start),
        })
    }

    /// Tokenize `lines` from scratch without touching any buffer state
    pub fn tokenize(&mut self, scope_name: &str, lines: &[String]) -> Result<Vec<Token>, SyntaxError> {
        let grammar = self.registry.load(scope_name)?;
        let mut stack = StateStack::initial(&grammar);
        let mut tokenizer = LineTokenizer::new(&grammar);

        let mut tokens = Vec::new();
        for (line_no, line) in lines.iter().enumerate() {
            let spans = tokenizer.tokenize_line(line_no, line, &mut stack)?;
            tokens.extend(to_tokens(line_no, line, spans));
        }
        Ok(tokens)
    }
}

/// Index of the first line that differs, or `None` if the buffers are equal.
/// A pure append or truncation differs at the shorter length.
fn first_difference(old: &[String], new: &[String]) -> Option<usize> {
    match old.iter().zip(new).position(|(a, b)| a != b) {
        Some(i) => Some(i),
        None if old.len() == new.len() => None,
        None => Some(old.len().min(new.len())),
    }
}

/// Convert byte spans into char-column tokens
fn to_tokens(line_no: usize, line: &str, spans: Vec<Span>) -> Vec<Token> {
    // byte offset -> char column, valid at char boundaries
    let mut columns = vec![0; line.len() + 1];
    let mut count = 0;
    for (i, (byte, _)) in line.char_indices().enumerate() {
        columns[byte] = i;
        count = i + 1;
    }
    columns[line.len()] = count;

    spans
        .into_iter()
        .map(|span| {
            let column = columns[span.start];
            Token {
                scopes: span.scopes,
                line: line_no,
                column,
                length: columns[span.end] - column,
            }
        })
        .filter(|token| token.length > 0)
        .collect()
}
