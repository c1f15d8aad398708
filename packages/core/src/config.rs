//! Engine configuration.
//!
//! Configuration is read-only from the engine's point of view: it can be
//! loaded from a JSON file, but nothing here ever writes one back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::executor::PrivilegeEscalation;
use crate::mount::MountDriver;
use crate::mounttab::MOUNTINFO_PATH;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "NTFS_MOUNT_CONFIG";

/// Configuration for a [`crate::Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// NTFS driver used by the mount backend.
    pub driver: MountDriver,
    /// How backend commands obtain root.
    pub escalation: PrivilegeEscalation,
    /// Extra `-o` options passed to the driver (e.g. `uid=1000`).
    pub extra_options: Vec<String>,
    /// OS mount table to consult.
    pub mountinfo_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            driver: MountDriver::default(),
            escalation: PrivilegeEscalation::default(),
            extra_options: Vec::new(),
            mountinfo_path: PathBuf::from(MOUNTINFO_PATH),
        }
    }
}

impl EngineConfig {
    /// Creates a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).config_read_context(path)?;
        serde_json::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads the file named by [`CONFIG_ENV`], or returns defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Sets the mount driver.
    pub fn with_driver(mut self, driver: MountDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the privilege escalation method.
    pub fn with_escalation(mut self, escalation: PrivilegeEscalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// Adds an extra driver option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }

    /// Sets the mount table path.
    pub fn with_mountinfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountinfo_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ErrorCode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_partial_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"driver": "ntfs3", "extra_options": ["uid=1000"]}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.driver, MountDriver::Ntfs3);
        assert_eq!(config.extra_options, vec!["uid=1000".to_string()]);
        assert_eq!(config.escalation, PrivilegeEscalation::None);
        assert_eq!(config.mountinfo_path, PathBuf::from(MOUNTINFO_PATH));
    }

    #[test]
    fn test_load_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "driver = ntfs3").unwrap();

        let err = EngineConfig::load(file.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InitFailed);
    }

    #[test]
    fn test_load_missing_config() {
        let err = EngineConfig::load(Path::new("/nonexistent/ntfs-mount.json")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_driver(MountDriver::Ntfs3)
            .with_escalation(PrivilegeEscalation::Sudo)
            .with_option("windows_names");
        assert_eq!(config.driver, MountDriver::Ntfs3);
        assert_eq!(config.escalation, PrivilegeEscalation::Sudo);
        assert_eq!(config.extra_options, vec!["windows_names".to_string()]);
    }
}
