//! Error taxonomy for the buffered B-tree core.
//!
//! Logical errors (`NotFound`, `Inval`, ...) propagate normally through
//! `Result`. I/O errors are different: they become a sticky panic recorded on
//! the [`crate::header::Header`] (see [`crate::header::HeaderMgr`]), after
//! which every subsequent call against the tree short-circuits with
//! [`Error::Panicked`] instead of touching disk again.

use thiserror::Error;

/// The error type returned by fallible operations in this crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A nonblocking pin could not be satisfied without I/O while other pins
    /// were held. Internal to descent; never surfaced across a public API
    /// call (the searcher retries instead).
    #[error("try again: pin required I/O while other pins were held")]
    TryAgain,

    /// The searched-for key is not present (or was deleted).
    #[error("key not found")]
    NotFound,

    /// A query callback rejected the candidate record, ending the search.
    #[error("search rejected by callback")]
    FoundButRejected,

    /// The file does not (yet) carry a valid header.
    #[error("no header present")]
    NoHeader,

    /// A snapshot read attempted to see a dictionary created after the
    /// snapshot was taken.
    #[error("dictionary too new for snapshot")]
    DictionaryTooNew,

    /// Misuse of the API: flag mismatch, unset cursor, empty key, etc.
    #[error("invalid usage: {0}")]
    Inval(String),

    /// Allocation failure. Callers may retry.
    #[error("out of memory")]
    Oom,

    /// An I/O failure. This is recorded on the header as a panic and is
    /// sticky: existing checkpoints remain valid, but no further writes are
    /// attempted.
    #[error("I/O error: {0}")]
    Io(String),

    /// The tree has been poisoned by a prior I/O panic; `{0}` is the error
    /// that caused it.
    #[error("operation rejected, tree is panicked: {0}")]
    Panicked(Box<Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl Error {
    /// True for errors which should be recorded as a sticky header panic
    /// rather than simply returned to the caller (§7).
    pub fn is_panic_worthy(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
