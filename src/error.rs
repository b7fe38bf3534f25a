// SPDX-License-Identifier: MPL-2.0
use std::fmt;

/// Errors produced by the playback engine.
///
/// All variants carry a human-readable message and are `Clone` so a single
/// error can be fanned out to every `on_error` subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The decoder refused the file. Surfaced synchronously from `open_file`;
    /// the currently loaded media, if any, is left untouched.
    FileUnsupported(String),

    /// A seek or read failed for a recoverable reason. Published on
    /// `on_error` and counted against the supervisor's error budget.
    DecoderTransient(String),

    /// Consecutive or time-windowed errors exceeded the configured
    /// thresholds; the worker terminates after publishing this.
    BudgetExceeded(String),

    /// Filesystem-level failure.
    Io(String),
}

impl Error {
    /// Short stable name of the error kind, for logging and matching.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FileUnsupported(_) => "file_unsupported",
            Error::DecoderTransient(_) => "decoder_transient",
            Error::BudgetExceeded(_) => "budget_exceeded",
            Error::Io(_) => "io",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FileUnsupported(e) => write!(f, "Unsupported file: {}", e),
            Error::DecoderTransient(e) => write!(f, "Decoder error: {}", e),
            Error::BudgetExceeded(e) => write!(f, "Error budget exceeded: {}", e),
            Error::Io(e) => write!(f, "I/O Error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
