//! Master engine errors.

use taskfleet_core::CoreError;
use thiserror::Error;

/// Errors produced by the master coordination engine and its consumed
/// contracts (repositories, buses).
#[derive(Debug, Error)]
pub enum MasterError {
    /// Domain-level error (invalid input, bad transition, not found).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Repository backend failure.
    #[error("Repository error: {0}")]
    Repository(String),

    /// Message-bus failure.
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Critical failure. Never swallowed: propagates out of the command
    /// loop immediately instead of being isolated to one command.
    #[error("Critical error: {0}")]
    Critical(String),
}

impl MasterError {
    /// Returns true if this error must abort the command loop.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_))
    }
}
