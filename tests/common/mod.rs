//! Shared test helpers for integration tests
//!
//! Note: Functions may appear unused because each test file compiles separately.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use scopemark::error::HostError;
use scopemark::highlight::{HighlightMark, LineRange, Rule, RuleTable, DEFAULT_RULE};
use scopemark::host::{BufferId, Host};
use scopemark::request::HighlightRequest;
use scopemark::sync::Highlighter;
use scopemark::syntax::{GrammarRegistry, Tokenizer};
use tempfile::TempDir;

/// Checked-in extension root holding the `toy` language
pub fn fixture_extensions() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/extensions")
}

pub fn registry() -> GrammarRegistry {
    GrammarRegistry::new(vec![fixture_extensions()])
}

pub fn tokenizer() -> Tokenizer {
    Tokenizer::new(registry())
}

pub fn rules() -> RuleTable {
    let mut table = RuleTable::default();
    table.insert(
        DEFAULT_RULE,
        Rule::new([
            ("comment", "Comment"),
            ("string", "String"),
            ("keyword", "Keyword"),
            ("constant.numeric", "Number"),
            ("entity.name.function", "Function"),
            ("storage", "StorageClass"),
        ]),
    );
    table
}

pub fn highlighter() -> Highlighter {
    Highlighter::new(registry(), rules())
}

pub fn lines(text: &[&str]) -> Vec<String> {
    text.iter().map(|s| s.to_string()).collect()
}

/// Write `contents` to `name` inside a fresh temp dir
pub fn source_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("Failed to write source file");
    (dir, path)
}

pub fn request(
    buffer: u64,
    path: &Path,
    text: &[&str],
    visible_end: usize,
    refresh: bool,
) -> HighlightRequest {
    HighlightRequest {
        buffer: BufferId(buffer),
        path: path.to_path_buf(),
        lines: lines(text),
        visible_end,
        refresh,
    }
}

/// An extension root with one language whose grammar nests `a` regions
/// through `$self`, so a long run of `a` overflows the rule stack
pub fn nesting_extension() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ext = dir.path().join("nest");
    std::fs::create_dir_all(&ext).unwrap();
    std::fs::write(
        ext.join("package.json"),
        r#"{"contributes": {
            "languages": [{"id": "nest", "extensions": [".nest"]}],
            "grammars": [{"language": "nest", "scopeName": "source.nest", "path": "nest.json"}]
        }}"#,
    )
    .unwrap();
    std::fs::write(
        ext.join("nest.json"),
        r#"{"scopeName": "source.nest", "patterns": [
            {"begin": "a", "end": "b", "name": "meta.nest", "patterns": [{"include": "$self"}]},
            {"match": "\\bk\\b", "name": "keyword.nest"}
        ]}"#,
    )
    .unwrap();
    dir
}

/// An extension root contributing each `(scope name, grammar JSON)` pair;
/// the first grammar is bound to the `.host` file extension
pub fn grammar_extension(grammars: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ext = dir.path().join("grammars");
    std::fs::create_dir_all(&ext).unwrap();

    let mut entries = Vec::new();
    for (i, (scope_name, grammar)) in grammars.iter().enumerate() {
        let file = format!("grammar{}.json", i);
        std::fs::write(ext.join(&file), grammar).unwrap();
        let mut entry = serde_json::json!({ "scopeName": scope_name, "path": file });
        if i == 0 {
            entry["language"] = "host".into();
        }
        entries.push(entry);
    }
    let manifest = serde_json::json!({ "contributes": {
        "languages": [{ "id": "host", "extensions": [".host"] }],
        "grammars": entries,
    }});
    std::fs::write(ext.join("package.json"), manifest.to_string()).unwrap();
    dir
}

/// A recorded host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    AddMarks {
        buffer: BufferId,
        marks: Vec<HighlightMark>,
    },
    RemoveMarks {
        buffer: BufferId,
        range: LineRange,
    },
    Disable,
    OpenScratch {
        filetype: String,
        lines: Vec<String>,
    },
}

/// Host that records every call, optionally failing mark calls
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub calls: Vec<HostCall>,
    /// When set, `add_highlight_marks` and `remove_highlight_marks` fail
    /// with this message
    pub fail_with: Option<String>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host whose marking calls always fail
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            calls: Vec::new(),
            fail_with: Some(message.into()),
        }
    }

    /// Drain the recorded calls
    pub fn take(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn mark_batches(&self) -> impl Iterator<Item = &[HighlightMark]> {
        self.calls.iter().filter_map(|call| match call {
            HostCall::AddMarks { marks, .. } => Some(marks.as_slice()),
            _ => None,
        })
    }

    pub fn removals(&self) -> impl Iterator<Item = LineRange> + '_ {
        self.calls.iter().filter_map(|call| match call {
            HostCall::RemoveMarks { range, .. } => Some(*range),
            _ => None,
        })
    }

    pub fn disabled(&self) -> bool {
        self.calls.contains(&HostCall::Disable)
    }

    fn check(&self) -> Result<(), HostError> {
        match &self.fail_with {
            Some(message) => Err(HostError(message.clone())),
            None => Ok(()),
        }
    }
}

impl Host for RecordingHost {
    fn add_highlight_marks(
        &mut self,
        buffer: BufferId,
        marks: &[HighlightMark],
    ) -> Result<(), HostError> {
        self.check()?;
        self.calls.push(HostCall::AddMarks {
            buffer,
            marks: marks.to_vec(),
        });
        Ok(())
    }

    fn remove_highlight_marks(
        &mut self,
        buffer: BufferId,
        range: LineRange,
    ) -> Result<(), HostError> {
        self.check()?;
        self.calls.push(HostCall::RemoveMarks { buffer, range });
        Ok(())
    }

    fn disable(&mut self) -> Result<(), HostError> {
        self.calls.push(HostCall::Disable);
        Ok(())
    }

    fn open_scratch(&mut self, filetype: &str, lines: &[String]) -> Result<(), HostError> {
        self.calls.push(HostCall::OpenScratch {
            filetype: filetype.to_owned(),
            lines: lines.to_vec(),
        });
        Ok(())
    }
}
