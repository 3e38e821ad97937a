//! Error type for file relocation.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from relocation operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// Underlying I/O failure, tagged with the path that failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A symlink's target could not be reproduced at the destination.
    #[error("can't recreate symlink {src} at {dst}: {source}")]
    Symlink {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> FileError {
    FileError::Io {
        path: path.into(),
        source,
    }
}
