//! Configuration management for tunn
//!
//! Tunnels are declared in a YAML file, `~/.tunnrc` by default:
//!
//! ```yaml
//! tunnels:
//!   api:
//!     host: server1
//!     ports: ["3000:3000", "4000"]
//!     user: deploy
//!     identity_file: ~/.ssh/deploy_key
//! ```

mod tunnel;

pub use tunnel::{Config, TunnelSpec};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Config file name inside the home directory
pub const CONFIG_FILE_NAME: &str = ".tunnrc";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "TUNN_CONFIG";

/// Get the default configuration file path
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(ConfigError::Read(e)),
    };

    let config: Config = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Load configuration from the default location
pub fn load() -> Result<Config, ConfigError> {
    load_config(&default_config_path()?)
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert_eq!(err.to_string(), "~/.tunnrc not found. Please create one!");
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tunnrc");
        std::fs::write(
            &path,
            "tunnels:\n  api:\n    host: server1\n    ports:\n      - \"3000:3000\"\n      - \"4000\"\n    user: deploy\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let api = &config.tunnels["api"];
        assert_eq!(api.host, "server1");
        assert_eq!(api.ports, vec!["3000:3000", "4000"]);
        assert_eq!(api.user.as_deref(), Some("deploy"));
        assert!(api.identity_file.is_none());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tunnrc");
        std::fs::write(&path, "tunnels: [not, a, map").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
        }
    }
}
