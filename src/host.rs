//! Host editor collaborator
//!
//! The core never talks to the editor directly; every side effect goes
//! through [`Host`]. The stdio transport implements it for a real editor.

use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::highlight::{HighlightMark, LineRange};

/// Editor buffer number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(pub u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BufferId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Side-effecting calls the core makes on the host editor
pub trait Host {
    /// Add a batch of highlight marks to a buffer
    fn add_highlight_marks(
        &mut self,
        buffer: BufferId,
        marks: &[HighlightMark],
    ) -> Result<(), HostError>;

    /// Remove every mark on `buffer` whose line falls in `range`
    fn remove_highlight_marks(
        &mut self,
        buffer: BufferId,
        range: LineRange,
    ) -> Result<(), HostError>;

    /// Turn the highlighting feature off in the editor
    fn disable(&mut self) -> Result<(), HostError>;

    /// Open a read-only scratch view showing `lines`
    fn open_scratch(&mut self, filetype: &str, lines: &[String]) -> Result<(), HostError>;
}
