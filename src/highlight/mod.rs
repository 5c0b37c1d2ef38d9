//! Highlight rules and mark application

mod applier;
mod rules;

pub use applier::{HighlightApplier, HighlightMark, LineRange};
pub use rules::{resolve_rule, Rule, RuleTable, DEFAULT_RULE};
