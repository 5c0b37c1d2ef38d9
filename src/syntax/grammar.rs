//! TextMate grammar model
//!
//! Raw grammars (as deserialized from JSON or YAML) are compiled into a flat
//! rule arena. Includes are resolved to rule ids at compile time so the line
//! tokenizer never looks anything up by name.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use onig::Regex;
use serde::Deserialize;

use crate::error::SyntaxError;

/// Index into a grammar's rule arena
pub(crate) type RuleId = usize;

/// Capture keys above this are rejected as malformed
pub(crate) const MAX_CAPTURE_INDEX: usize = 999;

/// Grammar as written in a `.tmLanguage.json` / `.tmLanguage.yaml` file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGrammar {
    pub scope_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default)]
    pub repository: HashMap<String, RawRule>,
}

/// A single grammar rule before compilation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    pub include: Option<String>,
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename = "match")]
    pub match_: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    #[serde(rename = "while")]
    pub while_: Option<String>,
    pub captures: Option<HashMap<String, RawRule>>,
    pub begin_captures: Option<HashMap<String, RawRule>>,
    pub end_captures: Option<HashMap<String, RawRule>>,
    pub while_captures: Option<HashMap<String, RawRule>>,
    pub patterns: Option<Vec<RawRule>>,
    pub repository: Option<HashMap<String, RawRule>>,
    #[serde(default)]
    pub apply_end_pattern_last: Option<Flag>,
}

/// Grammars write boolean flags either as `true` or as `1`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(n) => n != 0,
        }
    }
}

impl RawGrammar {
    /// Parse a grammar file, choosing JSON or YAML by file name
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

        if file_name.ends_with(".json") {
            serde_json::from_str(&content).map_err(|e| format!("{}: {}", path.display(), e))
        } else if file_name.ends_with(".yaml") || file_name.ends_with(".yml") {
            serde_yaml::from_str(&content).map_err(|e| format!("{}: {}", path.display(), e))
        } else {
            Err(format!("unsupported grammar format: {}", path.display()))
        }
    }
}

/// End or while pattern of a region rule
#[derive(Debug)]
pub(crate) struct RegionPattern {
    pub source: String,
    /// Pre-compiled regex; `None` when the source back-references begin
    /// captures and has to be resolved per match.
    pub compiled: Option<Regex>,
}

impl RegionPattern {
    pub fn is_dynamic(&self) -> bool {
        self.compiled.is_none()
    }

    /// Number of capture groups; an upper bound for dynamic patterns
    fn group_count(&self) -> usize {
        match &self.compiled {
            Some(regex) => regex.captures_len(),
            None => self.source.matches('(').count(),
        }
    }
}

/// How one capture group is scoped
#[derive(Debug, Default)]
pub(crate) struct Capture {
    pub name: Option<String>,
    /// Container rule re-run over the captured text
    pub patterns: Option<RuleId>,
}

impl Capture {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.patterns.is_none()
    }
}

/// Indexed by capture group
pub(crate) type Captures = Vec<Capture>;

#[derive(Debug)]
pub(crate) enum Rule {
    /// Pattern-only container (grammar root, repository groups)
    Patterns { patterns: Vec<RuleId> },
    Match {
        name: Option<String>,
        regex: Regex,
        captures: Captures,
    },
    BeginEnd {
        name: Option<String>,
        content_name: Option<String>,
        begin: Regex,
        begin_captures: Captures,
        /// `None` when the grammar omits `end`; the region then never closes
        end: Option<RegionPattern>,
        end_captures: Captures,
        patterns: Vec<RuleId>,
        apply_end_last: bool,
    },
    BeginWhile {
        name: Option<String>,
        content_name: Option<String>,
        begin: Regex,
        begin_captures: Captures,
        while_: RegionPattern,
        while_captures: Captures,
        patterns: Vec<RuleId>,
    },
}

impl Rule {
    fn patterns(&self) -> &[RuleId] {
        match self {
            Rule::Patterns { patterns }
            | Rule::BeginEnd { patterns, .. }
            | Rule::BeginWhile { patterns, .. } => patterns,
            Rule::Match { .. } => &[],
        }
    }
}

/// A compiled grammar, shared read-only between buffers
#[derive(Debug)]
pub struct Grammar {
    scope_name: String,
    rules: Vec<Rule>,
    /// Per rule: its `patterns` with containers flattened, in priority order
    candidates: Vec<Vec<RuleId>>,
    root: RuleId,
}

impl Grammar {
    /// Compile a raw grammar.
    ///
    /// `externals` supplies other grammars for `source.other` includes;
    /// returning `None` makes the include contribute nothing.
    pub fn compile(
        raw: &RawGrammar,
        externals: &mut dyn FnMut(&str) -> Option<Arc<RawGrammar>>,
    ) -> Result<Self, SyntaxError> {
        let mut compiler = Compiler {
            scope_name: raw.scope_name.clone(),
            rules: Vec::new(),
            memo: HashMap::new(),
            roots: HashMap::new(),
            base_root: None,
            externals,
            loaded: HashMap::new(),
        };

        let ctx = Ctx {
            grammar: raw,
            repos: vec![&raw.repository],
        };
        let root = compiler.compile_root(&ctx)?;

        let rules = compiler.rules;
        let candidates = (0..rules.len())
            .map(|id| {
                let mut out = Vec::new();
                let mut seen = HashSet::new();
                flatten(&rules, rules[id].patterns(), &mut out, &mut seen);
                out
            })
            .collect();

        tracing::debug!(
            "Compiled grammar {} ({} rules)",
            raw.scope_name,
            rules.len()
        );

        Ok(Self {
            scope_name: raw.scope_name.clone(),
            rules,
            candidates,
            root,
        })
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn root(&self) -> RuleId {
        self.root
    }

    pub(crate) fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub(crate) fn candidates(&self, id: RuleId) -> &[RuleId] {
        &self.candidates[id]
    }
}

fn flatten(rules: &[Rule], ids: &[RuleId], out: &mut Vec<RuleId>, seen: &mut HashSet<RuleId>) {
    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        match &rules[id] {
            Rule::Patterns { patterns } => flatten(rules, patterns, out, seen),
            _ => out.push(id),
        }
    }
}

/// Lexical context while compiling: owning grammar and enclosing repositories
struct Ctx<'r> {
    grammar: &'r RawGrammar,
    repos: Vec<&'r HashMap<String, RawRule>>,
}

struct Compiler<'a> {
    scope_name: String,
    rules: Vec<Rule>,
    /// Raw rules are keyed by address; every raw grammar stays alive
    /// (`loaded` or the caller's borrow) for the whole compile.
    memo: HashMap<*const RawRule, RuleId>,
    roots: HashMap<String, RuleId>,
    base_root: Option<RuleId>,
    externals: &'a mut dyn FnMut(&str) -> Option<Arc<RawGrammar>>,
    loaded: HashMap<String, Arc<RawGrammar>>,
}

impl Compiler<'_> {
    fn alloc(&mut self) -> RuleId {
        self.rules.push(Rule::Patterns {
            patterns: Vec::new(),
        });
        self.rules.len() - 1
    }

    fn compile_root(&mut self, ctx: &Ctx<'_>) -> Result<RuleId, SyntaxError> {
        if let Some(&id) = self.roots.get(&ctx.grammar.scope_name) {
            return Ok(id);
        }
        let id = self.alloc();
        self.roots.insert(ctx.grammar.scope_name.clone(), id);
        if self.base_root.is_none() {
            self.base_root = Some(id);
        }
        let patterns = self.compile_patterns(&ctx.grammar.patterns, ctx)?;
        self.rules[id] = Rule::Patterns { patterns };
        Ok(id)
    }

    fn compile_patterns(
        &mut self,
        raws: &[RawRule],
        ctx: &Ctx<'_>,
    ) -> Result<Vec<RuleId>, SyntaxError> {
        let mut ids = Vec::with_capacity(raws.len());
        for raw in raws {
            let id = match &raw.include {
                Some(include) => self.resolve_include(include, ctx)?,
                None => Some(self.compile_rule(raw, ctx)?),
            };
            ids.extend(id);
        }
        Ok(ids)
    }

    fn resolve_include(
        &mut self,
        include: &str,
        ctx: &Ctx<'_>,
    ) -> Result<Option<RuleId>, SyntaxError> {
        match include {
            "$self" => {
                let own = Ctx {
                    grammar: ctx.grammar,
                    repos: vec![&ctx.grammar.repository],
                };
                self.compile_root(&own).map(Some)
            }
            "$base" => Ok(self.base_root),
            local if local.starts_with('#') => {
                let name = &local[1..];
                match ctx.repos.iter().rev().find_map(|repo| repo.get(name)) {
                    Some(raw) => self.compile_rule(raw, ctx).map(Some),
                    None => {
                        tracing::debug!("Unresolved include {} in {}", local, self.scope_name);
                        Ok(None)
                    }
                }
            }
            external => {
                let (scope, fragment) = match external.split_once('#') {
                    Some((scope, fragment)) => (scope, Some(fragment)),
                    None => (external, None),
                };

                let grammar = if scope == ctx.grammar.scope_name {
                    None
                } else {
                    match self.external(scope) {
                        Some(g) => Some(g),
                        None => {
                            tracing::debug!(
                                "Include {} in {} refers to an unknown grammar",
                                external,
                                self.scope_name
                            );
                            return Ok(None);
                        }
                    }
                };

                let target = grammar.as_deref().unwrap_or(ctx.grammar);
                let target_ctx = Ctx {
                    grammar: target,
                    repos: vec![&target.repository],
                };
                match fragment {
                    None => self.compile_root(&target_ctx).map(Some),
                    Some(name) => match target.repository.get(name) {
                        Some(raw) => self.compile_rule(raw, &target_ctx).map(Some),
                        None => Ok(None),
                    },
                }
            }
        }
    }

    fn external(&mut self, scope: &str) -> Option<Arc<RawGrammar>> {
        if let Some(g) = self.loaded.get(scope) {
            return Some(Arc::clone(g));
        }
        let grammar = (self.externals)(scope)?;
        self.loaded.insert(scope.to_owned(), Arc::clone(&grammar));
        Some(grammar)
    }

    fn compile_rule(&mut self, raw: &RawRule, ctx: &Ctx<'_>) -> Result<RuleId, SyntaxError> {
        let key = raw as *const RawRule;
        if let Some(&id) = self.memo.get(&key) {
            return Ok(id);
        }
        let id = self.alloc();
        self.memo.insert(key, id);

        let mut repos = ctx.repos.clone();
        if let Some(repo) = &raw.repository {
            repos.push(repo);
        }
        let inner = Ctx {
            grammar: ctx.grammar,
            repos,
        };

        let patterns = match &raw.patterns {
            Some(patterns) => self.compile_patterns(patterns, &inner)?,
            None => Vec::new(),
        };

        let rule = if let Some(source) = &raw.match_ {
            let regex = self.regex(source)?;
            let captures = self.captures(raw.captures.as_ref(), regex.captures_len(), &inner)?;
            Rule::Match {
                name: raw.name.clone(),
                regex,
                captures,
            }
        } else if let Some(begin) = &raw.begin {
            let begin = self.regex(begin)?;
            let begin_captures = self.captures(
                raw.begin_captures.as_ref().or(raw.captures.as_ref()),
                begin.captures_len(),
                &inner,
            )?;
            match &raw.while_ {
                Some(while_) => {
                    let while_ = self.region_pattern(while_)?;
                    let while_captures = self.captures(
                        raw.while_captures.as_ref().or(raw.captures.as_ref()),
                        while_.group_count(),
                        &inner,
                    )?;
                    Rule::BeginWhile {
                        name: raw.name.clone(),
                        content_name: raw.content_name.clone(),
                        begin,
                        begin_captures,
                        while_,
                        while_captures,
                        patterns,
                    }
                }
                None => {
                    let end = match &raw.end {
                        Some(end) => Some(self.region_pattern(end)?),
                        None => None,
                    };
                    let end_captures = self.captures(
                        raw.end_captures.as_ref().or(raw.captures.as_ref()),
                        end.as_ref().map_or(0, RegionPattern::group_count),
                        &inner,
                    )?;
                    Rule::BeginEnd {
                        name: raw.name.clone(),
                        content_name: raw.content_name.clone(),
                        begin,
                        begin_captures,
                        end,
                        end_captures,
                        patterns,
                        apply_end_last: raw.apply_end_pattern_last.is_some_and(Flag::is_set),
                    }
                }
            }
        } else {
            Rule::Patterns { patterns }
        };

        self.rules[id] = rule;
        Ok(id)
    }

    /// Compile a capture map for a pattern with `groups` capture groups.
    ///
    /// Keys naming a group the pattern lacks are ignored, since grammars
    /// share one `captures` map between begin and end patterns.
    fn captures(
        &mut self,
        raw: Option<&HashMap<String, RawRule>>,
        groups: usize,
        ctx: &Ctx<'_>,
    ) -> Result<Captures, SyntaxError> {
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        let mut captures: Captures = Vec::new();
        for (key, rule) in raw {
            let Ok(index) = key.parse::<usize>() else {
                continue;
            };
            if index > MAX_CAPTURE_INDEX {
                return Err(SyntaxError::GrammarLoad {
                    scope_name: self.scope_name.clone(),
                    reason: format!("capture index {} out of range", index),
                });
            }
            if index > groups {
                tracing::debug!(
                    "Capture {} in {} has no matching group",
                    index,
                    self.scope_name
                );
                continue;
            }

            let patterns = match &rule.patterns {
                Some(_) => Some(self.compile_rule(rule, ctx)?),
                None => None,
            };
            if captures.len() <= index {
                captures.resize_with(index + 1, Capture::default);
            }
            captures[index] = Capture {
                name: rule.name.clone(),
                patterns,
            };
        }
        Ok(captures)
    }

    fn regex(&self, source: &str) -> Result<Regex, SyntaxError> {
        Regex::new(source).map_err(|e| SyntaxError::GrammarLoad {
            scope_name: self.scope_name.clone(),
            reason: format!("invalid regex {:?}: {}", source, e),
        })
    }

    fn region_pattern(&self, source: &str) -> Result<RegionPattern, SyntaxError> {
        let compiled = if has_back_references(source) {
            None
        } else {
            Some(self.regex(source)?)
        };
        Ok(RegionPattern {
            source: source.to_owned(),
            compiled,
        })
    }
}

/// True if the pattern contains `\1`..`\9` style back-references
pub(crate) fn has_back_references(source: &str) -> bool {
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(d) if d.is_ascii_digit() => return true,
                _ => {}
            }
        }
    }
    false
}

/// Substitute `\N` back-references with the (escaped) text captured by the
/// begin match.
pub(crate) fn resolve_back_references(
    source: &str,
    text: &str,
    groups: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() => {
                chars.next();
                let index = d.to_digit(10).unwrap_or(0) as usize;
                if let Some(Some((start, end))) = groups.get(index) {
                    out.push_str(&escape_regex(&text[*start..*end]));
                }
            }
            Some(other) => {
                chars.next();
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '*' | '+' | '?' | '.'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> Result<Grammar, SyntaxError> {
        let raw: RawGrammar = serde_json::from_str(json).unwrap();
        Grammar::compile(&raw, &mut |_| None)
    }

    #[test]
    fn test_compile_resolves_repository_includes() {
        let grammar = compile(
            r##"{
                "scopeName": "source.t",
                "patterns": [{ "include": "#kw" }, { "include": "#missing" }],
                "repository": { "kw": { "match": "\\bif\\b", "name": "keyword.t" } }
            }"##,
        )
        .unwrap();

        assert_eq!(grammar.scope_name(), "source.t");
        let candidates = grammar.candidates(grammar.root());
        assert_eq!(candidates.len(), 1);
        assert!(matches!(grammar.rule(candidates[0]), Rule::Match { .. }));
    }

    #[test]
    fn test_recursive_self_include_terminates() {
        let grammar = compile(
            r#"{
                "scopeName": "source.t",
                "patterns": [
                    { "begin": "\\(", "end": "\\)", "patterns": [{ "include": "$self" }] }
                ]
            }"#,
        )
        .unwrap();

        let root = grammar.root();
        let region = grammar.candidates(root)[0];
        // The region's own candidates point back at itself through $self
        assert_eq!(grammar.candidates(region), &[region]);
    }

    #[test]
    fn test_invalid_regex_is_load_error() {
        let err = compile(r#"{ "scopeName": "source.t", "patterns": [{ "match": "(" }] }"#)
            .unwrap_err();
        assert!(matches!(err, SyntaxError::GrammarLoad { .. }));
    }

    #[test]
    fn test_external_include_uses_resolver() {
        let other: Arc<RawGrammar> = Arc::new(
            serde_json::from_str(
                r#"{ "scopeName": "source.other", "patterns": [{ "match": "x", "name": "x.other" }] }"#,
            )
            .unwrap(),
        );
        let raw: RawGrammar = serde_json::from_str(
            r#"{ "scopeName": "source.t", "patterns": [{ "include": "source.other" }] }"#,
        )
        .unwrap();

        let mut asked = Vec::new();
        let grammar = Grammar::compile(&raw, &mut |scope| {
            asked.push(scope.to_owned());
            Some(Arc::clone(&other))
        })
        .unwrap();

        assert_eq!(asked, vec!["source.other".to_string()]);
        assert_eq!(grammar.candidates(grammar.root()).len(), 1);
    }

    #[test]
    fn test_huge_capture_index_is_load_error() {
        let err = compile(
            r#"{ "scopeName": "source.t", "patterns": [
                { "match": "a", "captures": { "4000000000": { "name": "x" } } }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SyntaxError::GrammarLoad { .. }));
        assert!(err.to_string().contains("4000000000"));
    }

    #[test]
    fn test_capture_without_group_is_ignored() {
        let grammar = compile(
            r#"{ "scopeName": "source.t", "patterns": [
                { "match": "(a)", "captures": { "1": { "name": "one" }, "7": { "name": "seven" } } }
            ] }"#,
        )
        .unwrap();
        let id = grammar.candidates(grammar.root())[0];
        match grammar.rule(id) {
            Rule::Match { captures, .. } => {
                assert_eq!(captures.len(), 2);
                assert_eq!(captures[1].name.as_deref(), Some("one"));
            }
            other => panic!("expected match rule, got {:?}", other),
        }
    }

    #[test]
    fn test_capture_patterns_compile_to_container() {
        let grammar = compile(
            r#"{ "scopeName": "source.t", "patterns": [
                { "match": "(ab)", "captures": { "1": { "patterns": [{ "match": "b", "name": "kw.b" }] } } }
            ] }"#,
        )
        .unwrap();
        let id = grammar.candidates(grammar.root())[0];
        let Rule::Match { captures, .. } = grammar.rule(id) else {
            panic!("expected match rule");
        };
        let container = captures[1].patterns.unwrap();
        assert!(matches!(grammar.rule(container), Rule::Patterns { .. }));
        assert_eq!(grammar.candidates(container).len(), 1);
    }

    #[test]
    fn test_back_reference_detection() {
        assert!(has_back_references("^\\1$"));
        assert!(!has_back_references("\\\\d"));
        assert!(!has_back_references("\\*/"));
    }

    #[test]
    fn test_resolve_back_references_escapes_capture() {
        let text = "<<A.B";
        let groups = vec![Some((0, 5)), Some((2, 5))];
        assert_eq!(resolve_back_references("^\\1$", text, &groups), "^A\\.B$");
        assert_eq!(resolve_back_references("\\s\\1", text, &groups), "\\sA\\.B");
    }

    #[test]
    fn test_end_with_back_reference_is_dynamic() {
        let grammar = compile(
            r#"{ "scopeName": "source.t", "patterns": [{ "begin": "(\\w+)<", "end": ">\\1" }] }"#,
        )
        .unwrap();
        let id = grammar.candidates(grammar.root())[0];
        match grammar.rule(id) {
            Rule::BeginEnd { end: Some(end), .. } => assert!(end.is_dynamic()),
            other => panic!("expected begin/end rule, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_end_pattern_last_accepts_int() {
        let grammar = compile(
            r#"{ "scopeName": "source.t", "patterns": [{ "begin": "a", "end": "b", "applyEndPatternLast": 1 }] }"#,
        )
        .unwrap();
        let id = grammar.candidates(grammar.root())[0];
        assert!(matches!(
            grammar.rule(id),
            Rule::BeginEnd {
                apply_end_last: true,
                ..
            }
        ));
    }
}
