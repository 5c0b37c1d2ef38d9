//! Highlight rule resolution
//!
//! A [`RuleTable`] maps grammar scope names (plus the literal `default`
//! key) to a [`Rule`]; a rule maps dotted scope selectors to host
//! highlight group names.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Key of the fallback rule in a rule table
pub const DEFAULT_RULE: &str = "default";

/// Scope selectors mapped to highlight group names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rule(pub BTreeMap<String, String>);

impl Rule {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Group for a single scope: exact match first, then progressively
    /// shorter parents (`keyword.control.rust` -> `keyword.control` -> `keyword`).
    pub fn group_for_scope(&self, scope: &str) -> Option<&str> {
        let mut current = scope;
        loop {
            if let Some(group) = self.0.get(current) {
                return Some(group);
            }

            let Some(dot_pos) = current.rfind('.') else {
                break;
            };
            current = &current[..dot_pos];
        }

        None
    }

    /// Group for a token's scope stack; the innermost scope with a match wins
    pub fn group_for(&self, scopes: &[String]) -> Option<&str> {
        scopes
            .iter()
            .rev()
            .find_map(|scope| self.group_for_scope(scope))
    }
}

/// Rules keyed by grammar scope name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable(pub HashMap<String, Rule>);

impl RuleTable {
    /// Rule for a file-level scope name, falling back to `default` and then
    /// to an empty rule
    pub fn resolve(&self, scope_name: &str) -> Rule {
        resolve_rule(self, scope_name)
    }

    pub fn insert(&mut self, scope_name: impl Into<String>, rule: Rule) {
        self.0.insert(scope_name.into(), rule);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Table with only a `default` rule covering common TextMate scopes
    pub fn builtin() -> Self {
        let rule = Rule::new([
            ("comment", "Comment"),
            ("string", "String"),
            ("string.regexp", "SpecialChar"),
            ("constant", "Constant"),
            ("constant.numeric", "Number"),
            ("constant.language", "Boolean"),
            ("constant.character", "Character"),
            ("constant.character.escape", "SpecialChar"),
            ("variable", "Identifier"),
            ("variable.parameter", "Identifier"),
            ("entity.name.function", "Function"),
            ("entity.name.type", "Type"),
            ("entity.name.tag", "Tag"),
            ("entity.other.attribute-name", "Label"),
            ("support.function", "Function"),
            ("support.type", "Type"),
            ("keyword", "Keyword"),
            ("keyword.control", "Statement"),
            ("keyword.operator", "Operator"),
            ("storage", "StorageClass"),
            ("storage.type", "Type"),
            ("punctuation.definition.comment", "Comment"),
            ("punctuation.definition.string", "String"),
            ("meta.preprocessor", "PreProc"),
            ("invalid", "Error"),
            ("markup.heading", "Title"),
            ("markup.underline.link", "Underlined"),
        ]);

        let mut table = Self::default();
        table.insert(DEFAULT_RULE, rule);
        table
    }
}

/// `table[scope_name]`, else `table["default"]`, else an empty rule
pub fn resolve_rule(table: &RuleTable, scope_name: &str) -> Rule {
    table
        .0
        .get(scope_name)
        .or_else(|| table.0.get(DEFAULT_RULE))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, Rule)]) -> RuleTable {
        RuleTable(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let d = Rule::new([("comment", "Comment")]);
        let t = table(&[(DEFAULT_RULE, d.clone())]);
        assert_eq!(resolve_rule(&t, "unknown.scope"), d);
    }

    #[test]
    fn test_resolve_prefers_exact_scope() {
        let p = Rule::new([("keyword", "Statement")]);
        let d = Rule::new([("comment", "Comment")]);
        let t = table(&[("source.py", p.clone()), (DEFAULT_RULE, d)]);
        assert_eq!(t.resolve("source.py"), p);
    }

    #[test]
    fn test_resolve_empty_table_gives_empty_rule() {
        assert!(resolve_rule(&RuleTable::default(), "source.rust").is_empty());
    }

    #[test]
    fn test_group_for_scope_hierarchical() {
        let rule = Rule::new([("keyword", "Keyword"), ("keyword.control", "Statement")]);
        assert_eq!(rule.group_for_scope("keyword.control.rust"), Some("Statement"));
        assert_eq!(rule.group_for_scope("keyword.other.rust"), Some("Keyword"));
        assert_eq!(rule.group_for_scope("keywordish"), None);
        assert_eq!(rule.group_for_scope("comment.line"), None);
    }

    #[test]
    fn test_group_for_innermost_first() {
        let rule = Rule::new([("string", "String"), ("constant", "SpecialChar")]);
        let scopes: Vec<String> = ["source.t", "string.quoted.t", "constant.character.escape.t"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(rule.group_for(&scopes), Some("SpecialChar"));
        assert_eq!(rule.group_for(&scopes[..2]), Some("String"));
        assert_eq!(rule.group_for(&scopes[..1]), None);
    }

    #[test]
    fn test_builtin_has_default() {
        let rule = RuleTable::builtin().resolve("source.anything");
        assert_eq!(rule.group_for_scope("comment.line.double-slash"), Some("Comment"));
        assert_eq!(rule.group_for_scope("constant.numeric.integer"), Some("Number"));
    }

    #[test]
    fn test_rule_table_from_yaml() {
        let yaml = r#"
default:
  comment: Comment
source.rust:
  keyword: Statement
"#;
        let t: RuleTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            t.resolve("source.rust").group_for_scope("keyword.control"),
            Some("Statement")
        );
        assert_eq!(
            t.resolve("source.c").group_for_scope("comment.block"),
            Some("Comment")
        );
    }
}
