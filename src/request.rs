//! Validated requests from the host
//!
//! The host calls in with a method name and a positional list of untyped
//! JSON arguments. [`Request::from_call`] checks them once; the rest of
//! the crate only sees the typed form.

use std::path::PathBuf;

use serde_json::Value;

use crate::error::RequestError;
use crate::highlight::LineRange;
use crate::host::BufferId;

/// Arguments of a highlight request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightRequest {
    pub buffer: BufferId,
    pub path: PathBuf,
    /// Full buffer content, never empty
    pub lines: Vec<String>,
    /// Last visible line (inclusive)
    pub visible_end: usize,
    /// Re-apply marks even if the content did not change
    pub refresh: bool,
}

/// One host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Tokenize a buffer and bring its marks up to date
    Highlight(HighlightRequest),
    /// Remove marks from a line range
    Undecorate { buffer: BufferId, range: LineRange },
    /// Open a scratch view listing every token's scopes
    ShowScope {
        buffer: BufferId,
        path: PathBuf,
        lines: Vec<String>,
    },
    /// Buffer was closed; drop its state
    Close { buffer: BufferId },
}

impl Request {
    /// Buffer the request targets
    pub fn buffer(&self) -> BufferId {
        match self {
            Self::Highlight(req) => req.buffer,
            Self::Undecorate { buffer, .. }
            | Self::ShowScope { buffer, .. }
            | Self::Close { buffer } => *buffer,
        }
    }

    /// Build a request from a method name and positional arguments
    pub fn from_call(method: &str, params: &[Value]) -> Result<Self, RequestError> {
        match method {
            "highlight" => {
                let args = Args::new("highlight", params, 5, 5, "5")?;
                Ok(Self::Highlight(HighlightRequest {
                    buffer: args.buffer(0)?,
                    path: args.path(1)?,
                    lines: args.lines(2)?,
                    visible_end: args.line_number(3, "end")?,
                    refresh: args.flag(4, "refresh")?,
                }))
            }
            "undecorate" => {
                let args = Args::new("undecorate", params, 2, 3, "2 or 3")?;
                let start = args.line_number(1, "start")?;
                let end = match params.get(2) {
                    Some(_) => Some(args.line_number(2, "end")?),
                    None => None,
                };
                Ok(Self::Undecorate {
                    buffer: args.buffer(0)?,
                    range: LineRange::new(start, end),
                })
            }
            "showScope" => {
                let args = Args::new("showScope", params, 3, 3, "3")?;
                Ok(Self::ShowScope {
                    buffer: args.buffer(0)?,
                    path: args.path(1)?,
                    lines: args.lines(2)?,
                })
            }
            "close" => {
                let args = Args::new("close", params, 1, 1, "1")?;
                Ok(Self::Close {
                    buffer: args.buffer(0)?,
                })
            }
            other => Err(RequestError::UnknownMethod(other.to_owned())),
        }
    }
}

/// Positional argument reader for one method
struct Args<'a> {
    method: &'static str,
    params: &'a [Value],
}

impl<'a> Args<'a> {
    fn new(
        method: &'static str,
        params: &'a [Value],
        min: usize,
        max: usize,
        expected: &'static str,
    ) -> Result<Self, RequestError> {
        if params.len() < min || params.len() > max {
            return Err(RequestError::Arity {
                method,
                expected,
                got: params.len(),
            });
        }
        Ok(Self { method, params })
    }

    fn invalid(&self, argument: &'static str, expected: &'static str) -> RequestError {
        RequestError::InvalidArgument {
            method: self.method,
            argument,
            expected,
        }
    }

    fn buffer(&self, index: usize) -> Result<BufferId, RequestError> {
        self.params[index]
            .as_u64()
            .map(BufferId)
            .ok_or_else(|| self.invalid("bufnr", "a non-negative integer"))
    }

    fn line_number(&self, index: usize, argument: &'static str) -> Result<usize, RequestError> {
        self.params[index]
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| self.invalid(argument, "a non-negative integer"))
    }

    fn path(&self, index: usize) -> Result<PathBuf, RequestError> {
        match self.params[index].as_str() {
            Some(s) if !s.is_empty() => Ok(PathBuf::from(s)),
            _ => Err(self.invalid("path", "a non-empty string")),
        }
    }

    fn flag(&self, index: usize, argument: &'static str) -> Result<bool, RequestError> {
        match &self.params[index] {
            Value::Bool(b) => Ok(*b),
            // Vim passes booleans as 0/1
            Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
            _ => Err(self.invalid(argument, "a boolean")),
        }
    }

    fn lines(&self, index: usize) -> Result<Vec<String>, RequestError> {
        let invalid = || self.invalid("lines", "a non-empty array of strings");
        let items = self.params[index].as_array().ok_or_else(invalid)?;
        if items.is_empty() {
            return Err(invalid());
        }
        items
            .iter()
            .map(|item| item.as_str().map(str::to_owned).ok_or_else(invalid))
            .collect()
    }
}
