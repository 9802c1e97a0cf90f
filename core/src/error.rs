//! Error types used throughout the simulator core.

use thiserror::Error;

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level simulator error, composed from each component's own error
/// type.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// An error raised by the bus or one of its peripherals.
    #[error(transparent)]
    Bus(#[from] crate::bus::Error),
    /// An error raised while decoding an instruction word.
    #[error(transparent)]
    Decode(#[from] crate::decode::Error),
    /// An error raised while executing a decoded instruction.
    #[error(transparent)]
    Exec(#[from] crate::exec::Error),
}

impl Error {
    /// Whether this error should be treated as fatal to the run loop
    /// (surfaced as `segv`), as opposed to a logged, non-fatal anomaly.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Bus(_) => false,
            Error::Decode(_) | Error::Exec(_) => true,
        }
    }
}
