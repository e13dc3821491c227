//! Configuration file loading and merging

use super::schema::{AllowedIps, Config, GateConfig};
use crate::error::{GateError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        // Priority order:
        // 1. $IPGATE_CONFIG
        // 2. $XDG_CONFIG_HOME/ipgate/config.toml
        // 3. ~/.config/ipgate/config.toml

        if let Ok(path) = env::var("IPGATE_CONFIG") {
            return PathBuf::from(path);
        }

        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("ipgate/config.toml");
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".config/ipgate/config.toml");
        }

        PathBuf::from("config.toml")
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| GateError::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load built-in configuration embedded in the binary
    pub fn load_builtin() -> Result<Config> {
        const BUILTIN_TOML: &str = include_str!("../builtin-defaults.toml");
        let config: Config = toml::from_str(BUILTIN_TOML)?;
        Ok(config)
    }

    /// Merge user config on top of built-in config.
    /// Each gate field the user sets replaces the built-in value; fields the
    /// user leaves out keep the built-in value.
    pub fn merge_configs(builtin: Config, user: Config) -> Config {
        let GateConfig {
            login_uri,
            login_uri_regex,
            ipv6_bounds,
            allowed_ips,
        } = user.gate;
        let base = builtin.gate;

        Config {
            common: user.common,
            gate: GateConfig {
                login_uri: login_uri.or(base.login_uri),
                login_uri_regex: login_uri_regex.or(base.login_uri_regex),
                ipv6_bounds: ipv6_bounds.or(base.ipv6_bounds),
                allowed_ips: AllowedIps {
                    ipv4: allowed_ips.ipv4.or(base.allowed_ips.ipv4),
                    ipv6: allowed_ips.ipv6.or(base.allowed_ips.ipv6),
                    address_sources: allowed_ips
                        .address_sources
                        .or(base.allowed_ips.address_sources),
                },
            },
        }
    }

    /// Load config with built-in as lowest-priority fallback
    /// Priority: User config > Built-in config
    pub fn load_with_builtins() -> Result<Config> {
        let builtin = Self::load_builtin()?;
        let path = Self::default_config_path();

        if path.exists() {
            let user = Self::load_from_file(&path)?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            tracing::debug!("User config not found at {:?}, using built-in defaults", path);
            Ok(builtin)
        }
    }

    /// Load config from optional path or default with built-in merge
    /// Priority: Explicit path > User config > Built-in config
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
        if let Some(p) = path {
            let user = Self::load_from_file(&p)?;
            let builtin = Self::load_builtin()?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            Self::load_with_builtins()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::AddressSource;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_config() {
        let config = ConfigLoader::load_builtin().unwrap();
        assert_eq!(config.common.config_version, "1.0");
        assert!(!config.common.verbose);
        assert_eq!(config.gate.login_uri.as_deref(), Some("neos"));
        assert!(config.gate.ipv4_rules().is_empty());
        assert!(config.gate.ipv6_rules().is_empty());
        assert_eq!(
            config.gate.address_sources(),
            vec![AddressSource::new(0, "REMOTE_ADDR")]
        );
    }

    #[test]
    fn test_merge_keeps_unset_builtin_fields() {
        let builtin = ConfigLoader::load_builtin().unwrap();
        let user: Config = toml::from_str(
            r#"
[gate.allowed_ips]
ipv4 = ["10.0.0.0/8"]
"#,
        )
        .unwrap();

        let merged = ConfigLoader::merge_configs(builtin, user);
        assert_eq!(merged.gate.ipv4_rules(), ["10.0.0.0/8".to_string()]);
        assert_eq!(merged.gate.login_uri.as_deref(), Some("neos"));
        assert_eq!(
            merged.gate.address_sources(),
            vec![AddressSource::new(0, "REMOTE_ADDR")]
        );
    }

    #[test]
    fn test_merge_user_overrides() {
        let builtin = ConfigLoader::load_builtin().unwrap();
        let user: Config = toml::from_str(
            r#"
[common]
verbose = true

[gate]
login_uri = "backstage"

[[gate.allowed_ips.address_sources]]
rank = 0
path = "HTTP_X_FORWARDED_FOR"

[[gate.allowed_ips.address_sources]]
rank = 1
path = "REMOTE_ADDR"
"#,
        )
        .unwrap();

        let merged = ConfigLoader::merge_configs(builtin, user);
        assert!(merged.common.verbose);
        assert_eq!(merged.gate.login_uri.as_deref(), Some("backstage"));
        assert_eq!(merged.gate.address_sources().len(), 2);
        assert_eq!(merged.gate.address_sources()[0].path, "HTTP_X_FORWARDED_FOR");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gate.allowed_ips]
ipv4 = ["192.168.1.0/24"]
ipv6 = ["2001:db8::/32"]
"#
        )
        .unwrap();

        let config = ConfigLoader::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.gate.ipv4_rules().len(), 1);
        assert_eq!(config.gate.ipv6_rules().len(), 1);
        assert_eq!(config.gate.protected_path_pattern(), "^(neos)?($|/)");
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = ConfigLoader::load_from_file("/nonexistent/ipgate/config.toml");
        assert!(matches!(result, Err(GateError::ConfigLoad { .. })));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[gate.allowed_ips]\nipv4 = \"not a list\"").unwrap();

        let result = ConfigLoader::load_from_file(file.path());
        assert!(matches!(result, Err(GateError::ConfigParse(_))));
    }
}
