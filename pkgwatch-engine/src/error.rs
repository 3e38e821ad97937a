//! Error types for engine configuration.
//!
//! Engine *operations* don't use these: the engine interface keeps the
//! original error model of bool-returning calls plus a drainable queue
//! of human-readable messages (see [`crate::traits::CacheEngine`]).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load — includes file path and line context.
    #[error("failed to parse engine config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
