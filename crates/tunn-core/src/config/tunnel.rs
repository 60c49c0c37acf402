//! Tunnel definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;

/// One configured SSH port-forward tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// SSH host (anything `ssh` accepts, including `~/.ssh/config` aliases)
    pub host: String,

    /// Port mappings in `[bind:]local[:remote]` form, in configured order
    #[serde(default)]
    pub ports: Vec<String>,

    /// Remote user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Private key passed to `ssh -i`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

impl TunnelSpec {
    /// Create a spec for a host with the given mappings
    pub fn new(host: impl Into<String>, ports: &[&str]) -> Self {
        Self {
            host: host.into(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
            user: None,
            identity_file: None,
        }
    }
}

/// Top-level config file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tunnels: BTreeMap<String, TunnelSpec>,
}

impl Config {
    /// Tunnels matching `names`, or every tunnel when `names` is empty
    ///
    /// Unknown names are skipped.
    pub fn filter_tunnels(&self, names: &[String]) -> BTreeMap<String, TunnelSpec> {
        if names.is_empty() {
            return self.tunnels.clone();
        }

        names
            .iter()
            .filter_map(|name| {
                self.tunnels
                    .get(name)
                    .map(|spec| (name.clone(), spec.clone()))
            })
            .collect()
    }

    /// Like [`Config::filter_tunnels`], failing when nothing is selected
    pub fn select(&self, names: &[String]) -> Result<BTreeMap<String, TunnelSpec>, ConfigError> {
        let selected = self.filter_tunnels(names);
        if selected.is_empty() {
            if names.is_empty() {
                return Err(ConfigError::NoTunnels);
            }
            return Err(ConfigError::NoMatch(names.to_vec()));
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        let mut tunnels = BTreeMap::new();
        tunnels.insert("api".to_string(), TunnelSpec::new("server1", &["3000:3000"]));
        tunnels.insert("db".to_string(), TunnelSpec::new("server2", &["5432"]));
        Config { tunnels }
    }

    #[test]
    fn test_filter_all_when_no_names() {
        let selected = sample().filter_tunnels(&[]);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_filter_by_name_skips_unknown() {
        let names = vec!["db".to_string(), "cache".to_string()];
        let selected = sample().filter_tunnels(&names);
        assert_eq!(selected.len(), 1);
        assert!(selected.contains_key("db"));
    }

    #[test]
    fn test_select_errors() {
        let empty = Config::default();
        assert!(matches!(empty.select(&[]), Err(ConfigError::NoTunnels)));

        let err = sample().select(&["cache".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), r#"no tunnels found matching: ["cache"]"#);
    }
}
