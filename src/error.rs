//! Error taxonomy for the highlighting core
//!
//! `GrammarNotFound` is a normal "skip this file" outcome; every other
//! variant is contained by the orchestrator and disables highlighting.

use std::path::PathBuf;

/// Errors raised by the registry, tokenizer and applier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// No grammar matches the file
    GrammarNotFound { path: PathBuf },
    /// Grammar source is missing, malformed, or contains an invalid regex
    GrammarLoad { scope_name: String, reason: String },
    /// The grammar engine failed while tokenizing a line
    Tokenize { line: usize, reason: String },
    /// The host marking API rejected a call
    HighlightApply(HostError),
}

impl SyntaxError {
    /// True for outcomes that should be skipped silently rather than
    /// reported (the file simply has no grammar).
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::GrammarNotFound { .. })
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GrammarNotFound { path } => {
                write!(f, "no grammar found for {}", path.display())
            }
            Self::GrammarLoad { scope_name, reason } => {
                write!(f, "failed to load grammar {}: {}", scope_name, reason)
            }
            Self::Tokenize { line, reason } => {
                write!(f, "tokenize error at line {}: {}", line, reason)
            }
            Self::HighlightApply(e) => write!(f, "failed to apply highlight: {}", e),
        }
    }
}

impl std::error::Error for SyntaxError {}

impl From<HostError> for SyntaxError {
    fn from(e: HostError) -> Self {
        Self::HighlightApply(e)
    }
}

/// Failure reported by the host editor for a side-effecting call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError(pub String);

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HostError {}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// A host call whose arguments failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Method name is not one of the dispatch operations
    UnknownMethod(String),
    /// Wrong number of arguments
    Arity {
        method: &'static str,
        expected: &'static str,
        got: usize,
    },
    /// An argument had the wrong shape
    InvalidArgument {
        method: &'static str,
        argument: &'static str,
        expected: &'static str,
    },
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMethod(name) => write!(f, "unknown method: {}", name),
            Self::Arity {
                method,
                expected,
                got,
            } => write!(f, "{}: expected {} arguments, got {}", method, expected, got),
            Self::InvalidArgument {
                method,
                argument,
                expected,
            } => write!(f, "{}: argument `{}` must be {}", method, argument, expected),
        }
    }
}

impl std::error::Error for RequestError {}
