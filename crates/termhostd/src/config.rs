//! Daemon configuration.
//!
//! Read from `config.toml` in the user's config directory
//! (`~/.config/termhost/config.toml` on Linux). Every field is optional:
//!
//! ```toml
//! socket_path = "/tmp/termhost.sock"
//! max_sessions = 64
//! crash_window_secs = 60
//! crash_threshold = 5
//! recovery_delay_ms = 1000
//! ```
//!
//! `TERMHOST_SOCKET` overrides `socket_path`; command-line flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manager::crash::{DEFAULT_CRASH_THRESHOLD, DEFAULT_CRASH_WINDOW};
use crate::manager::{ManagerConfig, DEFAULT_MAX_SESSIONS, DEFAULT_RECOVERY_DELAY};
use crate::server::DEFAULT_SOCKET_PATH;

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "TERMHOST_SOCKET";

/// Settings for the daemon process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub max_sessions: usize,
    pub crash_window_secs: u64,
    pub crash_threshold: usize,
    pub recovery_delay_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_sessions: DEFAULT_MAX_SESSIONS,
            crash_window_secs: DEFAULT_CRASH_WINDOW.as_secs(),
            crash_threshold: DEFAULT_CRASH_THRESHOLD,
            recovery_delay_ms: DEFAULT_RECOVERY_DELAY.as_millis() as u64,
        }
    }
}

impl DaemonConfig {
    /// `<config dir>/termhost/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("termhost").join("config.toml"))
    }

    /// Loads configuration.
    ///
    /// An explicit `path` must exist. Without one, the default path is used
    /// if present and built-in defaults otherwise. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        let config = config.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides using `lookup` to read variables.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(socket) = lookup(SOCKET_ENV).filter(|s| !s.trim().is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
        self
    }

    /// Rejects values that would make the manager unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str| ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        };

        if self.max_sessions == 0 {
            return Err(invalid("max_sessions"));
        }
        if self.crash_threshold == 0 {
            return Err(invalid("crash_threshold"));
        }
        if self.crash_window_secs == 0 {
            return Err(invalid("crash_window_secs"));
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "socket_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_sessions: self.max_sessions,
            crash_window: Duration::from_secs(self.crash_window_secs),
            crash_threshold: self.crash_threshold,
            recovery_delay: Duration::from_millis(self.recovery_delay_ms),
        }
    }
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_manager_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/termhost.sock"));
        assert_eq!(config.manager_config(), ManagerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_sessions = 8\nrecovery_delay_ms = 250").unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.crash_threshold, 5);

        let manager = config.manager_config();
        assert_eq!(manager.recovery_delay, Duration::from_millis(250));
        assert_eq!(manager.crash_window, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_session = 8").unwrap();

        let err = DaemonConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_env_override() {
        let config = DaemonConfig::default().with_env_overrides(|key| {
            (key == SOCKET_ENV).then(|| "/run/user/1000/termhost.sock".to_string())
        });
        assert_eq!(config.socket_path, PathBuf::from("/run/user/1000/termhost.sock"));

        let config = DaemonConfig::default().with_env_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = DaemonConfig {
            crash_threshold: 0,
            ..DaemonConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid config value for crash_threshold: must be greater than zero"
        );
    }
}
