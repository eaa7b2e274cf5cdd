//! Console configuration, loaded once at startup from a YAML file.
//!
//! ```yaml
//! web:
//!   bind_address: 0.0.0.0
//!   port: 8080
//!   allowed_ips: ["10.0.0.5"]
//! auth:
//!   admin_token: "a-long-random-secret"
//! storage:
//!   sqlite_path: data/pluginmanager.sqlite
//!   max_backups_per_file: 50
//! extensions:
//!   plugins_dir: plugins
//! ```
//!
//! Every section except `auth` may be omitted.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Placeholder shipped in the sample config. The console refuses to start
/// while the admin token still has this value.
pub const PLACEHOLDER_ADMIN_TOKEN: &str = "CHANGE_ME";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Admin token must be changed from its default value; set a secure auth.admin_token")]
    InsecureAdminToken,

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub web: WebConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Peers allowed to reach gated routes. Empty means every address.
    pub allowed_ips: Vec<IpAddr>,
    pub max_body_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            allowed_ips: Vec::new(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_admin_token")]
    pub admin_token: String,
    /// When set, only `admin` sessions may mutate plugins or their config;
    /// sessions with any other role are read-only.
    #[serde(default)]
    pub use_role_groups: bool,
    #[serde(default = "default_sweep_secs")]
    pub session_sweep_secs: u64,
}

fn default_admin_token() -> String {
    PLACEHOLDER_ADMIN_TOKEN.to_string()
}

fn default_sweep_secs() -> u64 {
    300
}

impl AuthConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sqlite_path: PathBuf,
    /// Snapshots kept per (plugin, file). 0 keeps every snapshot.
    pub max_backups_per_file: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/pluginmanager.sqlite"),
            max_backups_per_file: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directory whose subdirectories are the plugins' private data folders.
    pub plugins_dir: PathBuf,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
        }
    }
}

impl ConsoleConfig {
    /// Read, parse and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: ConsoleConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.auth.admin_token.trim();
        if token.is_empty() || token == PLACEHOLDER_ADMIN_TOKEN {
            return Err(ConfigError::InsecureAdminToken);
        }
        if self.web.port == 0 {
            return Err(ConfigError::Invalid("web.port must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ConsoleConfig::from_yaml("auth:\n  admin_token: s3cret-token\n").unwrap();
        assert_eq!(config.web.port, 8080);
        assert!(config.web.allowed_ips.is_empty());
        assert_eq!(config.storage.max_backups_per_file, 50);
        assert_eq!(config.extensions.plugins_dir, PathBuf::from("plugins"));
        assert!(!config.auth.use_role_groups);
    }

    #[test]
    fn placeholder_token_is_rejected() {
        let err = ConsoleConfig::from_yaml("auth:\n  admin_token: CHANGE_ME\n").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureAdminToken));

        let err = ConsoleConfig::from_yaml("auth: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureAdminToken));
    }

    #[test]
    fn allow_list_parses_addresses() {
        let yaml = "web:\n  allowed_ips: [\"10.0.0.5\", \"::1\"]\nauth:\n  admin_token: abc\n";
        let config = ConsoleConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.web.allowed_ips.len(), 2);
        assert_eq!(config.web.allowed_ips[0], IpAddr::from([10, 0, 0, 5]));
    }

    #[test]
    fn malformed_allow_list_entry_fails() {
        let yaml = "web:\n  allowed_ips: [\"not-an-ip\"]\nauth:\n  admin_token: abc\n";
        assert!(matches!(
            ConsoleConfig::from_yaml(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConsoleConfig::load(&dir.path().join("absent.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
