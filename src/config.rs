//! Configuration loading
//!
//! Reads `~/.config/scopemark/config.yaml`:
//!
//! ```yaml
//! extensions_path: [~/.config/scopemark/extensions]
//! rules:
//!   default: { comment: Comment, string: String }
//!   source.rust: { keyword: Statement }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config_paths;
use crate::highlight::RuleTable;

/// Startup configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Extension roots, searched in order; `~` is expanded
    #[serde(default)]
    pub extensions_path: Vec<PathBuf>,
    /// Rules keyed by grammar scope name plus `default`
    #[serde(default)]
    pub rules: RuleTable,
}

impl Config {
    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = config_paths::config_file() else {
            tracing::debug!("No config directory available, using defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load config from `path`; a missing, unreadable or malformed file
    /// yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<Option<Self>>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config.unwrap_or_default()
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config at {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Extension roots with `~` expanded; the default extension directory
    /// when none are configured
    pub fn extension_roots(&self) -> Vec<PathBuf> {
        if self.extensions_path.is_empty() {
            return config_paths::extensions_dir().into_iter().collect();
        }
        self.extensions_path
            .iter()
            .map(|p| config_paths::expand_home(p))
            .collect()
    }
}
