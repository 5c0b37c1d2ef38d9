//! Grammar registry
//!
//! Indexes the languages and grammars contributed by extension packages
//! found under the configured extension roots, resolves file paths to
//! scope names and loads grammars lazily (each at most once).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use onig::Regex;
use serde::Deserialize;

use super::grammar::{Grammar, RawGrammar};
use super::ScopeName;
use crate::error::SyntaxError;

/// Longest first line inspected when sniffing a file's language
const FIRST_LINE_LIMIT: u64 = 1024;

/// `package.json` of an extension; only the parts we index
#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    contributes: Contributes,
}

#[derive(Debug, Default, Deserialize)]
struct Contributes {
    #[serde(default)]
    languages: Vec<ManifestLanguage>,
    #[serde(default)]
    grammars: Vec<ManifestGrammar>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestLanguage {
    id: String,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    filenames: Vec<String>,
    #[serde(default)]
    first_line: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestGrammar {
    #[serde(default)]
    language: Option<String>,
    scope_name: String,
    path: PathBuf,
}

/// A language contributed by an extension
#[derive(Debug)]
pub struct Language {
    pub id: String,
    /// Lower-cased, always with a leading dot
    pub extensions: Vec<String>,
    pub filenames: Vec<String>,
    first_line: Option<Regex>,
}

impl Language {
    fn matches_first_line(&self, line: &str) -> bool {
        self.first_line
            .as_ref()
            .is_some_and(|regex| regex.find(line).is_some())
    }
}

/// Loads and caches grammars from a set of extension roots
#[derive(Debug, Default)]
pub struct GrammarRegistry {
    roots: Vec<PathBuf>,
    languages: Vec<Language>,
    /// Language id -> scope name of the grammar contributed for it
    language_scopes: HashMap<String, ScopeName>,
    /// Scope name -> grammar file
    sources: HashMap<ScopeName, PathBuf>,
    raw: HashMap<ScopeName, Arc<RawGrammar>>,
    grammars: HashMap<ScopeName, Arc<Grammar>>,
    path_cache: HashMap<PathBuf, ScopeName>,
}

impl GrammarRegistry {
    /// Scan the extension roots. Roots are searched in order; the first
    /// contribution of a scope name or language grammar wins.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let mut registry = Self {
            roots,
            ..Self::default()
        };

        for root in registry.roots.clone() {
            registry.scan_root(&root);
        }

        tracing::info!(
            "Indexed {} languages and {} grammars from {} extension roots",
            registry.languages.len(),
            registry.sources.len(),
            registry.roots.len()
        );
        registry
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    /// Whether a grammar for `scope_name` is known (loaded or not)
    pub fn has_grammar(&self, scope_name: &str) -> bool {
        self.sources.contains_key(scope_name)
    }

    /// Whether `scope_name` has already been loaded and compiled
    pub fn is_loaded(&self, scope_name: &str) -> bool {
        self.grammars.contains_key(scope_name)
    }

    fn scan_root(&mut self, root: &Path) {
        if root.join("package.json").is_file() {
            self.scan_extension(root);
            return;
        }

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Skipping extension root {}: {}", root.display(), e);
                return;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join("package.json").is_file())
            .collect();
        // read_dir order is platform dependent
        dirs.sort();

        for dir in dirs {
            self.scan_extension(&dir);
        }
    }

    fn scan_extension(&mut self, dir: &Path) {
        let manifest_path = dir.join("package.json");
        let manifest: Manifest = match fs::read_to_string(&manifest_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("Skipping extension {}: {}", manifest_path.display(), e);
                return;
            }
        };

        for lang in manifest.contributes.languages {
            let first_line = lang.first_line.as_deref().and_then(|source| {
                Regex::new(source)
                    .map_err(|e| {
                        tracing::warn!("Invalid firstLine for {}: {}", lang.id, e);
                    })
                    .ok()
            });
            self.languages.push(Language {
                extensions: lang
                    .extensions
                    .iter()
                    .map(|ext| normalize_extension(ext))
                    .collect(),
                filenames: lang.filenames,
                id: lang.id,
                first_line,
            });
        }

        for grammar in manifest.contributes.grammars {
            let path = dir.join(&grammar.path);
            if let Some(language) = grammar.language {
                self.language_scopes
                    .entry(language)
                    .or_insert_with(|| grammar.scope_name.clone());
            }
            self.sources.entry(grammar.scope_name).or_insert(path);
        }
    }

    /// Resolve a file path to the scope name of its grammar.
    ///
    /// Tries exact file names, then the longest matching extension, then
    /// the `firstLine` patterns against the file's first line on disk.
    /// Successful lookups are cached for the life of the registry.
    pub fn scope_name(&mut self, path: &Path) -> Result<ScopeName, SyntaxError> {
        if let Some(scope) = self.path_cache.get(path) {
            return Ok(scope.clone());
        }

        let scope = self
            .scope_by_file_name(path)
            .or_else(|| self.scope_by_first_line(path))
            .ok_or_else(|| SyntaxError::GrammarNotFound {
                path: path.to_path_buf(),
            })?;

        tracing::debug!("Resolved {} to {}", path.display(), scope);
        self.path_cache.insert(path.to_path_buf(), scope.clone());
        Ok(scope)
    }

    fn scope_by_file_name(&self, path: &Path) -> Option<ScopeName> {
        let file_name = path.file_name()?.to_str()?;

        if let Some(scope) = self
            .languages
            .iter()
            .filter(|lang| lang.filenames.iter().any(|name| name == file_name))
            .find_map(|lang| self.language_scopes.get(&lang.id))
        {
            return Some(scope.clone());
        }

        // Longest matching extension wins (".d.ts" over ".ts"); ties keep
        // the earlier language
        let lower = file_name.to_lowercase();
        let mut best: Option<(&str, &Language)> = None;
        for lang in &self.languages {
            if !self.language_scopes.contains_key(&lang.id) {
                continue;
            }
            for ext in &lang.extensions {
                if lower.ends_with(ext.as_str()) && best.map_or(true, |(b, _)| ext.len() > b.len())
                {
                    best = Some((ext.as_str(), lang));
                }
            }
        }
        best.and_then(|(_, lang)| self.language_scopes.get(&lang.id).cloned())
    }

    fn scope_by_first_line(&self, path: &Path) -> Option<ScopeName> {
        if !self.languages.iter().any(|lang| lang.first_line.is_some()) {
            return None;
        }
        let line = read_first_line(path)?;
        self.languages
            .iter()
            .filter(|lang| lang.matches_first_line(&line))
            .find_map(|lang| self.language_scopes.get(&lang.id).cloned())
    }

    /// Load (once) and return the compiled grammar for `scope_name`
    pub fn load(&mut self, scope_name: &str) -> Result<Arc<Grammar>, SyntaxError> {
        if let Some(grammar) = self.grammars.get(scope_name) {
            return Ok(Arc::clone(grammar));
        }

        let raw = self.raw(scope_name)?;
        let grammar = {
            let mut externals = |scope: &str| match self.raw(scope) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    tracing::debug!("Cannot include {}: {}", scope, e);
                    None
                }
            };
            Grammar::compile(&raw, &mut externals)?
        };

        let grammar = Arc::new(grammar);
        tracing::info!("Loaded grammar {}", scope_name);
        self.grammars
            .insert(scope_name.to_owned(), Arc::clone(&grammar));
        Ok(grammar)
    }

    fn raw(&mut self, scope_name: &str) -> Result<Arc<RawGrammar>, SyntaxError> {
        if let Some(raw) = self.raw.get(scope_name) {
            return Ok(Arc::clone(raw));
        }

        let load_error = |reason: String| SyntaxError::GrammarLoad {
            scope_name: scope_name.to_owned(),
            reason,
        };

        let path = self
            .sources
            .get(scope_name)
            .ok_or_else(|| load_error("no extension contributes this scope".to_string()))?;
        let raw = RawGrammar::from_file(path).map_err(load_error)?;
        if raw.scope_name != scope_name {
            tracing::warn!(
                "Grammar {} declares scope {} but was contributed as {}",
                path.display(),
                raw.scope_name,
                scope_name
            );
        }

        let raw = Arc::new(raw);
        self.raw.insert(scope_name.to_owned(), Arc::clone(&raw));
        Ok(raw)
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn read_first_line(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file.take(FIRST_LINE_LIMIT));
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    Some(line.trim_end_matches(['\r', '\n']).to_string())
}
