use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the slave's session runtime.
#[derive(Debug, Error)]
pub enum SlaveError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("wire protocol error: {0}")]
    Proto(#[from] pkgwatch_proto::ProtoError),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("engine error: {0}")]
    Engine(#[from] pkgwatch_engine::EngineError),

    #[error("session error: {0}")]
    Session(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SlaveError {
    SlaveError::Io {
        path: path.into(),
        source,
    }
}
