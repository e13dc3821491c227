//! Configuration schema types

use crate::filter::rule::Ipv6BoundsPolicy;
use serde::{Deserialize, Serialize};

/// Login path used to build the protected path pattern when none is configured
pub const DEFAULT_LOGIN_URI: &str = "neos";

/// Complete gate configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

/// Settings shared by all binaries
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonConfig {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_config_version() -> String {
    "1.0".to_string()
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            verbose: false,
        }
    }
}

/// Allow-list gate settings.
///
/// Every field is optional so a user file can override the built-in
/// defaults one field at a time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GateConfig {
    /// Login path prefix; protected pattern becomes `^(<login_uri>)?($|/)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_uri: Option<String>,
    /// Full protected path pattern, overrides `login_uri`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_uri_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_bounds: Option<Ipv6BoundsPolicy>,
    #[serde(default)]
    pub allowed_ips: AllowedIps,
}

/// Allow-list rules and where to find the client address
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AllowedIps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_sources: Option<Vec<AddressSource>>,
}

/// One place to read the client address from, lower rank is tried first
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddressSource {
    pub rank: i64,
    /// Dotted lookup path into the request metadata, e.g. `REMOTE_ADDR`
    pub path: String,
}

impl AddressSource {
    pub fn new(rank: i64, path: impl Into<String>) -> Self {
        Self {
            rank,
            path: path.into(),
        }
    }
}

impl GateConfig {
    /// Protected path pattern as a regular expression source string
    pub fn protected_path_pattern(&self) -> String {
        if let Some(regex) = self.login_uri_regex.as_deref().filter(|r| !r.is_empty()) {
            return regex.to_string();
        }

        let login_uri = self
            .login_uri
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_LOGIN_URI);
        format!("^({})?($|/)", login_uri)
    }

    pub fn ipv4_rules(&self) -> &[String] {
        self.allowed_ips.ipv4.as_deref().unwrap_or_default()
    }

    pub fn ipv6_rules(&self) -> &[String] {
        self.allowed_ips.ipv6.as_deref().unwrap_or_default()
    }

    /// Address sources ordered by ascending rank
    pub fn address_sources(&self) -> Vec<AddressSource> {
        let mut sources = self.allowed_ips.address_sources.clone().unwrap_or_default();
        sources.sort_by_key(|s| s.rank);
        sources
    }

    pub fn ipv6_bounds(&self) -> Ipv6BoundsPolicy {
        self.ipv6_bounds.unwrap_or_default()
    }
}
