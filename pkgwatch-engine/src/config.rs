//! Engine configuration, persisted as YAML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Repository site whose upgrades are treated as security fixes when
/// nothing else is configured.
pub const DEFAULT_SECURITY_ORIGIN: &str = "security.debian.org";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Site name of the designated security-origin repository.
    #[serde(default = "default_security_origin")]
    pub security_origin: String,
    /// Override for the system list directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_dir: Option<PathBuf>,
    /// Override for the system archive directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,
}

fn default_security_origin() -> String {
    DEFAULT_SECURITY_ORIGIN.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            security_origin: default_security_origin(),
            list_dir: None,
            archive_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(EngineError::Io(e)),
        };
        serde_yaml::from_str(&text).map_err(|source| EngineError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `~/.pkgwatch/config.yaml`, or defaults when HOME is
    /// unavailable.
    pub fn load_default() -> Result<Self, EngineError> {
        match dirs::home_dir() {
            Some(home) => Self::load(&home.join(".pkgwatch").join("config.yaml")),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = EngineConfig::load(&dir.path().join("nope.yaml")).expect("load");
        assert_eq!(cfg.security_origin, DEFAULT_SECURITY_ORIGIN);
        assert!(cfg.list_dir.is_none());
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "security_origin: security.internal.example\n").expect("write");

        let cfg = EngineConfig::load(&path).expect("load");
        assert_eq!(cfg.security_origin, "security.internal.example");
        assert!(cfg.archive_dir.is_none());
    }

    #[test]
    fn malformed_yaml_reports_the_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, ":\n  - not: [valid").expect("write");

        let err = EngineConfig::load(&path).expect_err("must fail");
        assert!(err.to_string().contains("config.yaml"));
    }
}
