//! scopemark - incremental TextMate highlighting for editors
//!
//! Tokenizes editor buffers with TextMate grammars, re-tokenizing only
//! from the first changed line, and keeps the editor's highlight marks in
//! sync with the tokens through a small host interface.

pub mod cli;
pub mod config;
pub mod config_paths;
pub mod error;
pub mod highlight;
pub mod host;
pub mod request;
pub mod server;
pub mod sync;
pub mod syntax;
pub mod tracing;

// Re-export commonly used types
pub use config::Config;
pub use error::{HostError, RequestError, SyntaxError};
pub use host::{BufferId, Host};
pub use request::Request;
pub use sync::{Highlighter, Outcome};
pub use syntax::{GrammarRegistry, Token, Tokenizer};
