//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

/// Incremental TextMate highlighting for editors
#[derive(Parser, Debug)]
#[command(
    name = "scopemark",
    version,
    about = "Incremental TextMate highlighting for editors"
)]
pub struct CliArgs {
    /// Config file (default: ~/.config/scopemark/config.yaml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Extension root; repeat to search several, in order
    #[arg(long = "extensions", value_name = "DIR", global = true)]
    pub extensions: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve host requests as JSON lines on stdin/stdout (default)
    Serve,
    /// Tokenize a file and print every token with its scopes
    Dump {
        /// File to tokenize
        file: PathBuf,
    },
}

impl CliArgs {
    /// Load the config and apply command-line overrides
    pub fn config(&self) -> Config {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        };
        if !self.extensions.is_empty() {
            config.extensions_path = self.extensions.clone();
        }
        config
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
