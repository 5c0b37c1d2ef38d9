use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use scopemark::cli::{CliArgs, Command};
use scopemark::config::Config;
use scopemark::sync::{scope_listing, Highlighter};
use scopemark::syntax::{GrammarRegistry, Tokenizer};

fn main() -> Result<()> {
    scopemark::tracing::init();

    let args = CliArgs::parse();
    let config = args.config();

    match args.command() {
        Command::Serve => {
            let mut highlighter = Highlighter::from_config(&config);
            let stdin = io::stdin();
            scopemark::server::serve(stdin.lock(), io::stdout(), &mut highlighter)
        }
        Command::Dump { file } => dump(&config, &file),
    }
}

/// Print the scope listing of `file` to stdout
fn dump(config: &Config, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut lines: Vec<String> = text.lines().map(str::to_owned).collect();
    if lines.is_empty() {
        lines.push(String::new());
    }

    let mut tokenizer = Tokenizer::new(GrammarRegistry::new(config.extension_roots()));
    let scope_name = tokenizer.scope_name(file)?;
    let tokens = tokenizer.tokenize(&scope_name, &lines)?;

    let mut out = io::stdout().lock();
    for line in scope_listing(&scope_name, &tokens) {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}
