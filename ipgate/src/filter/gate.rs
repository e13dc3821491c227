//! Access gate: protected-path detection, client address resolution and
//! allow-list evaluation

use super::decider::AccessDecider;
use super::request::{AccessRequest, RequestMeta};
use super::rule::{AddressFamily, Ipv6BoundsPolicy, Rule};
use crate::config::schema::{AddressSource, GateConfig};
use crate::config::validator::ConfigValidator;
use crate::error::Result;
use regex::Regex;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Final allow/deny outcome handed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        *self == Verdict::Allow
    }

    /// Status of an auth-request reply: 204 on allow, 403 on deny
    pub fn status_code(&self) -> u16 {
        match self {
            Verdict::Allow => 204,
            Verdict::Deny => 403,
        }
    }
}

/// Why the gate let a request through without looking at its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    EmptyPath,
    NotConfigured,
    Unprotected,
}

/// How an allowed address was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Ipv4Rule,
    Ipv6Rule,
}

/// Detailed gate outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Bypass(BypassReason),
    Permitted {
        address: String,
        rule: String,
        kind: MatchKind,
    },
    Rejected {
        address: String,
    },
}

impl Decision {
    pub fn verdict(&self) -> Verdict {
        match self {
            Decision::Bypass(_) | Decision::Permitted { .. } => Verdict::Allow,
            Decision::Rejected { .. } => Verdict::Deny,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Bypass(BypassReason::EmptyPath) => write!(f, "allow: empty path"),
            Decision::Bypass(BypassReason::NotConfigured) => {
                write!(f, "allow: no allow-list rules configured")
            }
            Decision::Bypass(BypassReason::Unprotected) => {
                write!(f, "allow: path is not protected")
            }
            Decision::Permitted {
                address,
                rule,
                kind: MatchKind::Exact,
            } => write!(f, "allow: {:?} equals rule {:?}", address, rule),
            Decision::Permitted {
                address,
                rule,
                kind,
            } => {
                let family = if *kind == MatchKind::Ipv4Rule { "IPv4" } else { "IPv6" };
                write!(f, "allow: {} matched {} rule {}", address, family, rule)
            }
            Decision::Rejected { address } if address.is_empty() => {
                write!(f, "deny: no client address found")
            }
            Decision::Rejected { address } => write!(f, "deny: {} matched no rule", address),
        }
    }
}

/// A configured rule, parsed once, with its original text kept for
/// exact-string matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredRule {
    raw: String,
    rule: Rule,
}

impl ConfiguredRule {
    pub fn new(raw: impl Into<String>, family: AddressFamily, policy: Ipv6BoundsPolicy) -> Self {
        let raw = raw.into();
        let rule = Rule::parse_with(&raw, family, policy);
        Self { raw, rule }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}

/// Compiled, immutable allow-list configuration
#[derive(Debug, Clone)]
pub struct AllowListConfig {
    protected_path: Regex,
    ipv4_rules: Vec<ConfiguredRule>,
    ipv6_rules: Vec<ConfiguredRule>,
    address_sources: Vec<AddressSource>,
    ipv6_bounds: Ipv6BoundsPolicy,
}

impl AllowListConfig {
    /// Start from a protected path pattern with no rules and no address sources
    pub fn new(protected_path: Regex) -> Self {
        Self {
            protected_path,
            ipv4_rules: Vec::new(),
            ipv6_rules: Vec::new(),
            address_sources: Vec::new(),
            ipv6_bounds: Ipv6BoundsPolicy::default(),
        }
    }

    /// Compile gate settings; fails on an invalid pattern or address sources
    pub fn from_settings(settings: &GateConfig) -> Result<Self> {
        let protected_path = ConfigValidator::validate(settings)?;

        Ok(Self::new(protected_path)
            .with_ipv6_bounds(settings.ipv6_bounds())
            .with_ipv4_rules(settings.ipv4_rules())
            .with_ipv6_rules(settings.ipv6_rules())
            .with_address_sources(settings.address_sources()))
    }

    pub fn with_ipv4_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = self.ipv6_bounds;
        self.ipv4_rules.extend(
            rules
                .into_iter()
                .map(|raw| ConfiguredRule::new(raw.as_ref(), AddressFamily::Ipv4, policy)),
        );
        self
    }

    pub fn with_ipv6_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = self.ipv6_bounds;
        self.ipv6_rules.extend(
            rules
                .into_iter()
                .map(|raw| ConfiguredRule::new(raw.as_ref(), AddressFamily::Ipv6, policy)),
        );
        self
    }

    /// Add an address source; sources stay sorted by rank, ties keep insertion order
    pub fn with_address_source(mut self, rank: i64, path: impl Into<String>) -> Self {
        self.address_sources.push(AddressSource::new(rank, path));
        self.address_sources.sort_by_key(|s| s.rank);
        self
    }

    pub fn with_address_sources<I: IntoIterator<Item = AddressSource>>(mut self, sources: I) -> Self {
        self.address_sources.extend(sources);
        self.address_sources.sort_by_key(|s| s.rank);
        self
    }

    /// Switch the IPv6 bounds policy, re-parsing any IPv6 rules already added
    pub fn with_ipv6_bounds(mut self, policy: Ipv6BoundsPolicy) -> Self {
        self.ipv6_bounds = policy;
        for configured in &mut self.ipv6_rules {
            configured.rule = Rule::parse_with(&configured.raw, AddressFamily::Ipv6, policy);
        }
        self
    }

    pub fn protected_path(&self) -> &Regex {
        &self.protected_path
    }

    pub fn ipv4_rules(&self) -> &[ConfiguredRule] {
        &self.ipv4_rules
    }

    pub fn ipv6_rules(&self) -> &[ConfiguredRule] {
        &self.ipv6_rules
    }

    pub fn address_sources(&self) -> &[AddressSource] {
        &self.address_sources
    }

    pub fn ipv6_bounds(&self) -> Ipv6BoundsPolicy {
        self.ipv6_bounds
    }

    /// No rules in either family: the gate lets everything through
    pub fn is_inert(&self) -> bool {
        self.ipv4_rules.is_empty() && self.ipv6_rules.is_empty()
    }
}

/// Allow-list gate around protected paths.
///
/// Evaluation is a pure function of the request and the immutable config.
#[derive(Debug, Clone)]
pub struct AccessGate {
    config: AllowListConfig,
}

impl AccessGate {
    pub fn new(config: AllowListConfig) -> Self {
        Self { config }
    }

    pub fn from_settings(settings: &GateConfig) -> Result<Self> {
        Ok(Self::new(AllowListConfig::from_settings(settings)?))
    }

    pub fn config(&self) -> &AllowListConfig {
        &self.config
    }

    pub fn evaluate(&self, request: &AccessRequest) -> Verdict {
        self.decide(request).verdict()
    }

    pub fn decide(&self, request: &AccessRequest) -> Decision {
        let path = request.path.strip_prefix('/').unwrap_or(&request.path);
        if path.is_empty() {
            return Decision::Bypass(BypassReason::EmptyPath);
        }
        if self.config.is_inert() {
            return Decision::Bypass(BypassReason::NotConfigured);
        }
        if !self.config.protected_path.is_match(path) {
            return Decision::Bypass(BypassReason::Unprotected);
        }

        let address = self.resolve_address(&request.meta);

        // An empty address means no source resolved; it must not ride on an
        // empty rule string into the allow list
        if !address.is_empty() {
            let exact = self
                .config
                .ipv4_rules
                .iter()
                .chain(&self.config.ipv6_rules)
                .find(|r| r.raw == address);
            if let Some(rule) = exact {
                return permitted(&address, rule, MatchKind::Exact);
            }
        }

        if let Ok(v4) = address.parse::<Ipv4Addr>() {
            let value = u32::from(v4);
            if let Some(rule) = self.config.ipv4_rules.iter().find(|r| r.rule.contains_v4(value)) {
                return permitted(&address, rule, MatchKind::Ipv4Rule);
            }
        }

        if let Ok(v6) = address.parse::<Ipv6Addr>() {
            let value = u128::from(v6);
            if let Some(rule) = self.config.ipv6_rules.iter().find(|r| r.rule.contains_v6(value)) {
                return permitted(&address, rule, MatchKind::Ipv6Rule);
            }
        }

        Decision::Rejected { address }
    }

    /// First non-empty value among the address sources, by ascending rank.
    /// Empty when no source yields a value.
    pub fn resolve_address(&self, meta: &RequestMeta) -> String {
        self.config
            .address_sources
            .iter()
            .filter_map(|source| meta.lookup(&source.path))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

fn permitted(address: &str, rule: &ConfiguredRule, kind: MatchKind) -> Decision {
    Decision::Permitted {
        address: address.to_string(),
        rule: rule.raw.clone(),
        kind,
    }
}

impl AccessDecider for AccessGate {
    fn decide(&self, request: &AccessRequest) -> Decision {
        AccessGate::decide(self, request)
    }
}
