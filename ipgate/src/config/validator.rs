//! Configuration validation and rule linting

use super::schema::GateConfig;
use crate::error::{GateError, Result, ValidationError};
use crate::filter::rule::{AddressFamily, Ipv6BoundsPolicy, Rule};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

pub struct ConfigValidator;

/// A rule that loads fine but probably does not do what its author meant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWarning {
    pub family: AddressFamily,
    pub rule: String,
    pub kind: RuleWarningKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleWarningKind {
    /// Empty string in a rule list
    Empty,
    /// Not a range rule and not an address; can only match by exact string
    Unparseable { reason: &'static str },
    /// Dotted netmask that is not a run of leading ones
    NonContiguousNetmask,
    /// IPv6 bounds from group padding are wider than the written prefix
    WiderThanPrefix { prefix_len: u8 },
}

impl fmt::Display for RuleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuleWarningKind::Empty => write!(f, "empty {} rule", self.family),
            RuleWarningKind::Unparseable { reason } => write!(
                f,
                "{} rule {:?} is not a range ({}); it only matches that exact string",
                self.family, self.rule, reason
            ),
            RuleWarningKind::NonContiguousNetmask => write!(
                f,
                "{} rule {:?} uses a netmask that is not left-aligned",
                self.family, self.rule
            ),
            RuleWarningKind::WiderThanPrefix { prefix_len } => write!(
                f,
                "{} rule {:?} admits addresses outside /{} (bounds come from the written groups)",
                self.family, self.rule, prefix_len
            ),
        }
    }
}

impl ConfigValidator {
    /// Validate gate settings that would make the gate unusable, returning
    /// the compiled protected path pattern
    pub fn validate(gate: &GateConfig) -> Result<Regex> {
        let pattern = Self::check_pattern(gate)?;
        Self::check_sources(gate)?;
        Ok(pattern)
    }

    fn check_pattern(gate: &GateConfig) -> Result<Regex> {
        let pattern = gate.protected_path_pattern();
        Regex::new(&pattern).map_err(|source| GateError::InvalidPattern { pattern, source })
    }

    /// Ranks must be unique and every source needs a lookup path
    fn check_sources(gate: &GateConfig) -> Result<()> {
        let mut seen = HashSet::new();
        for source in gate.address_sources() {
            if source.path.trim().is_empty() {
                return Err(ValidationError::EmptySourcePath { rank: source.rank }.into());
            }
            if !seen.insert(source.rank) {
                return Err(ValidationError::DuplicateRank { rank: source.rank }.into());
            }
        }
        Ok(())
    }

    /// Collect warnings for suspicious rules. Never fails.
    pub fn lint_rules(gate: &GateConfig) -> Vec<RuleWarning> {
        let policy = gate.ipv6_bounds();
        let ipv4 = gate
            .ipv4_rules()
            .iter()
            .filter_map(|raw| Self::lint_rule(raw, AddressFamily::Ipv4, policy));
        let ipv6 = gate
            .ipv6_rules()
            .iter()
            .filter_map(|raw| Self::lint_rule(raw, AddressFamily::Ipv6, policy));
        ipv4.chain(ipv6).collect()
    }

    fn lint_rule(raw: &str, family: AddressFamily, policy: Ipv6BoundsPolicy) -> Option<RuleWarning> {
        let warning = |kind| {
            Some(RuleWarning {
                family,
                rule: raw.to_string(),
                kind,
            })
        };

        if raw.is_empty() {
            return warning(RuleWarningKind::Empty);
        }

        let rule = match Rule::try_parse_with(raw, family, policy) {
            Ok(rule) => rule,
            Err(_) if is_plain_address(raw, family) => return None,
            Err(crate::error::MatchError::MalformedRule { reason, .. }) => {
                return warning(RuleWarningKind::Unparseable { reason });
            }
            Err(_) => return None,
        };

        match rule {
            Rule::CidrMask { mask, .. } if mask.leading_ones() + mask.trailing_zeros() != 32 => {
                warning(RuleWarningKind::NonContiguousNetmask)
            }
            Rule::Ipv6Cidr {
                lower,
                upper,
                prefix_len: Some(prefix_len),
            } if policy == Ipv6BoundsPolicy::GroupPadding => {
                let strict = Rule::parse_with(raw, family, Ipv6BoundsPolicy::Prefix);
                match strict {
                    Rule::Ipv6Cidr {
                        lower: strict_lower,
                        upper: strict_upper,
                        ..
                    } if lower < strict_lower || upper > strict_upper => {
                        warning(RuleWarningKind::WiderThanPrefix { prefix_len })
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn is_plain_address(raw: &str, family: AddressFamily) -> bool {
    match family {
        AddressFamily::Ipv4 => raw.parse::<Ipv4Addr>().is_ok(),
        AddressFamily::Ipv6 => raw.parse::<Ipv6Addr>().is_ok(),
    }
}
