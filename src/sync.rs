//! Sync orchestrator
//!
//! Decides, per highlight request, how much of a buffer's marks to
//! rebuild, and contains every failure of the layers below it: a failed
//! request is logged with [`DIAGNOSTIC_PREFIX`] and the host is told to
//! disable highlighting.
//!
//! ```text
//! change_start  refresh   plan
//! None          false     NoChange        (no host I/O)
//! None          true      FullRefresh     clear all, set all
//! Some(s)       true      FullRefresh     clear s..=end, set s..=end
//! Some(s)       false     PartialUpdate   set s..=end
//! ```

use std::path::Path;

use serde::Serialize;

use crate::config::Config;
use crate::error::SyntaxError;
use crate::highlight::{HighlightApplier, LineRange, RuleTable};
use crate::host::{BufferId, Host};
use crate::request::{HighlightRequest, Request};
use crate::syntax::{GrammarRegistry, Token, Tokenizer};

/// Prefix for every contained failure in the log
pub const DIAGNOSTIC_PREFIX: &str = "[scopemark]";

/// Filetype of the show-scope scratch view
pub const SCRATCH_FILETYPE: &str = "scopemark";

/// What a highlight request does with the host's marks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlan {
    /// Marks already reflect the content
    NoChange,
    /// Add marks for `lines` without clearing first
    PartialUpdate { lines: LineRange },
    /// Clear `clear`, then add marks for `set`
    FullRefresh { clear: LineRange, set: LineRange },
}

impl SyncPlan {
    pub fn decide(change_start: Option<usize>, refresh: bool, visible_end: usize) -> Self {
        match (change_start, refresh) {
            (None, false) => Self::NoChange,
            (None, true) => Self::FullRefresh {
                clear: LineRange::ALL,
                set: LineRange::ALL,
            },
            (Some(start), true) => Self::FullRefresh {
                clear: LineRange::between(start, visible_end),
                set: LineRange::between(start, visible_end),
            },
            (Some(start), false) => Self::PartialUpdate {
                lines: LineRange::between(start, visible_end),
            },
        }
    }
}

/// Why a request was dropped without doing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The path does not exist on disk
    FileMissing,
    /// No grammar matches the path
    NoGrammar,
    /// Highlighting was disabled by an earlier failure
    FeatureDisabled,
}

/// Result of handling one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Outcome {
    Skipped { reason: SkipReason },
    NoChange,
    PartialUpdate { from: usize, to: usize, marks: usize },
    FullRefresh {
        from: usize,
        to: Option<usize>,
        marks: usize,
    },
    /// The request failed and highlighting is now disabled
    Disabled { error: String },
    Undecorated,
    ScopeShown { tokens: usize },
    Closed,
    /// The request failed without disabling highlighting
    Failed { error: String },
}

/// Owns the tokenizer, the mark store and the rule table
pub struct Highlighter {
    tokenizer: Tokenizer,
    applier: HighlightApplier,
    rules: RuleTable,
    disabled: bool,
}

impl Highlighter {
    pub fn new(registry: GrammarRegistry, rules: RuleTable) -> Self {
        Self {
            tokenizer: Tokenizer::new(registry),
            applier: HighlightApplier::new(),
            rules,
            disabled: false,
        }
    }

    /// Highlighter over the configured extension roots; falls back to the
    /// built-in rule table when the config has none
    pub fn from_config(config: &Config) -> Self {
        let rules = if config.rules.is_empty() {
            RuleTable::builtin()
        } else {
            config.rules.clone()
        };
        Self::new(GrammarRegistry::new(config.extension_roots()), rules)
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn applier(&self) -> &HighlightApplier {
        &self.applier
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Re-arm highlighting after a failure
    pub fn enable(&mut self) {
        if self.disabled {
            tracing::info!("Highlighting re-enabled");
        }
        self.disabled = false;
    }

    /// Dispatch a validated request
    pub fn handle(&mut self, host: &mut dyn Host, request: &Request) -> Outcome {
        match request {
            Request::Highlight(req) => self.highlight(host, req),
            Request::Undecorate { buffer, range } => self.undecorate(host, *buffer, *range),
            Request::ShowScope {
                buffer,
                path,
                lines,
            } => self.show_scope(host, *buffer, path, lines),
            Request::Close { buffer } => self.close_buffer(*buffer),
        }
    }

    /// Tokenize the buffer and bring its marks up to date
    pub fn highlight(&mut self, host: &mut dyn Host, req: &HighlightRequest) -> Outcome {
        if self.disabled {
            return Outcome::Skipped {
                reason: SkipReason::FeatureDisabled,
            };
        }
        if !req.path.exists() {
            return Outcome::Skipped {
                reason: SkipReason::FileMissing,
            };
        }

        match self.try_highlight(host, req) {
            Ok(outcome) => outcome,
            Err(e) if e.is_skip() => Outcome::Skipped {
                reason: SkipReason::NoGrammar,
            },
            Err(e) => self.fail(host, e),
        }
    }

    fn try_highlight(
        &mut self,
        host: &mut dyn Host,
        req: &HighlightRequest,
    ) -> Result<Outcome, SyntaxError> {
        let scope_name = self.tokenizer.scope_name(&req.path)?;
        let parsed = self.tokenizer.parse(req.buffer, &scope_name, &req.lines)?;
        let plan = SyncPlan::decide(parsed.change_start, req.refresh, req.visible_end);
        tracing::debug!("Buffer {} ({}): {:?}", req.buffer, scope_name, plan);

        let rule = self.rules.resolve(&scope_name);
        let in_range = |range: LineRange| {
            parsed
                .tokens
                .iter()
                .filter(move |token| range.contains(token.line))
        };

        match plan {
            SyncPlan::NoChange => Ok(Outcome::NoChange),
            SyncPlan::PartialUpdate { lines } => {
                let marks = self
                    .applier
                    .set(host, req.buffer, &rule, in_range(lines))?;
                Ok(Outcome::PartialUpdate {
                    from: lines.start,
                    to: req.visible_end,
                    marks,
                })
            }
            SyncPlan::FullRefresh { clear, set } => {
                if !clear.is_empty() {
                    self.applier.undecorate(host, req.buffer, clear)?;
                }
                let marks = self.applier.set(host, req.buffer, &rule, in_range(set))?;
                Ok(Outcome::FullRefresh {
                    from: set.start,
                    to: set.end,
                    marks,
                })
            }
        }
    }

    /// Remove marks from a line range
    pub fn undecorate(&mut self, host: &mut dyn Host, buffer: BufferId, range: LineRange) -> Outcome {
        match self.applier.undecorate(host, buffer, range) {
            Ok(()) => Outcome::Undecorated,
            Err(e) => self.fail(host, e),
        }
    }

    /// Open a scratch view listing every token of the buffer with its scopes.
    ///
    /// Failures are logged but leave highlighting enabled.
    pub fn show_scope(
        &mut self,
        host: &mut dyn Host,
        buffer: BufferId,
        path: &Path,
        lines: &[String],
    ) -> Outcome {
        if !path.exists() {
            return Outcome::Skipped {
                reason: SkipReason::FileMissing,
            };
        }

        let result = self.tokenizer.scope_name(path).and_then(|scope_name| {
            let tokens = self.tokenizer.tokenize(&scope_name, lines)?;
            Ok((scope_name, tokens))
        });
        let (scope_name, tokens) = match result {
            Ok(found) => found,
            Err(e) if e.is_skip() => {
                return Outcome::Skipped {
                    reason: SkipReason::NoGrammar,
                }
            }
            Err(e) => {
                tracing::error!("{} {}", DIAGNOSTIC_PREFIX, e);
                return Outcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        tracing::debug!("Showing {} tokens of buffer {}", tokens.len(), buffer);
        let listing = scope_listing(&scope_name, &tokens);
        match host.open_scratch(SCRATCH_FILETYPE, &listing) {
            Ok(()) => Outcome::ScopeShown {
                tokens: tokens.len(),
            },
            Err(e) => {
                tracing::error!("{} {}", DIAGNOSTIC_PREFIX, e);
                Outcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Drop all per-buffer state of a closed buffer
    pub fn close_buffer(&mut self, buffer: BufferId) -> Outcome {
        self.tokenizer.forget(buffer);
        self.applier.forget(buffer);
        Outcome::Closed
    }

    fn fail(&mut self, host: &mut dyn Host, error: SyntaxError) -> Outcome {
        tracing::error!("{} {}", DIAGNOSTIC_PREFIX, error);
        self.disabled = true;
        if let Err(e) = host.disable() {
            tracing::error!("{} failed to disable highlighting: {}", DIAGNOSTIC_PREFIX, e);
        }
        Outcome::Disabled {
            error: error.to_string(),
        }
    }
}

/// Lines of the show-scope view: a `scopeName:` header, then per token its
/// scopes and its `[line, col] - [line, col]` range
pub fn scope_listing(scope_name: &str, tokens: &[Token]) -> Vec<String> {
    let mut lines = Vec::with_capacity(tokens.len() * 2 + 1);
    lines.push(format!("scopeName: {}", scope_name));
    for token in tokens {
        lines.push(token.scopes.join(", "));
        lines.push(format!(
            "\t[{}, {}] - [{}, {}]",
            token.line,
            token.column,
            token.line,
            token.end_column()
        ));
    }
    lines
}
