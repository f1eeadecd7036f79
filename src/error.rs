//! Error types for archive construction.
//!
//! Every fallible builder operation returns [`Result<T>`]. Errors carry the
//! archive path or source path of the entry in progress so a caller can
//! report which write aborted the archive.
//!
//! ```rust,ignore
//! use initramfs_builder::{ArchiveBuilder, Error};
//!
//! match builder.copy_tree(root) {
//!     Err(Error::UnsupportedNodeType { path, .. }) => eprintln!("cannot archive {}", path.display()),
//!     other => other?,
//! }
//! ```

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure modes of the archive builder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The output sink rejected a header or payload write.
    #[error("failed to write archive entry '{path}'")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A source file could not be opened, stat'ed or read.
    #[error("failed to read '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A content transform failed; nothing was written for the entry.
    #[error("transform of '{}' failed", path.display())]
    Transform {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A tree walk met a node the archive has no entry type for
    /// (block/char devices, FIFOs, sockets).
    #[error("unsupported node type {kind} at '{}'", path.display())]
    UnsupportedNodeType { path: PathBuf, kind: &'static str },

    /// The directory walk itself failed (not found, permission denied, loop).
    #[error("failed to walk '{}'", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A second entry was requested at an archive path already taken.
    #[error("archive path '{path}' was already written")]
    DuplicateEntry { path: String },

    /// An ancestor of the requested path was written as a non-directory.
    #[error("archive path '{path}' is not a directory")]
    NotADirectory { path: String },

    /// The path cannot be used for this entry.
    #[error("invalid archive path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A source file's length changed between stat and copy.
    #[error("'{}' changed size while being archived (expected {expected} bytes, copied {actual})", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

impl Error {
    pub(crate) fn io(path: &str, source: io::Error) -> Self {
        Error::Io {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Read {
            path: path.into(),
            source,
        }
    }
}
