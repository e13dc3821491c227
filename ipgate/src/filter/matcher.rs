//! Address-against-rule matching

use super::rule::{AddressFamily, Ipv6BoundsPolicy, Rule};
use crate::error::MatchError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Matcher for a candidate address against a single textual rule.
///
/// Stateless apart from the IPv6 bounds policy. Malformed rules and
/// malformed addresses never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressMatcher {
    ipv6_bounds: Ipv6BoundsPolicy,
}

impl AddressMatcher {
    /// Create a matcher with group-padding IPv6 bounds
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ipv6_bounds(ipv6_bounds: Ipv6BoundsPolicy) -> Self {
        Self { ipv6_bounds }
    }

    pub fn ipv6_bounds(&self) -> Ipv6BoundsPolicy {
        self.ipv6_bounds
    }

    /// Check whether `candidate` falls inside `rule`
    pub fn matches(&self, candidate: &str, rule: &str, family: AddressFamily) -> bool {
        self.try_matches(candidate, rule, family).unwrap_or(false)
    }

    /// Like [`AddressMatcher::matches`], but reports malformed input
    pub fn try_matches(
        &self,
        candidate: &str,
        rule: &str,
        family: AddressFamily,
    ) -> Result<bool, MatchError> {
        let rule = Rule::try_parse_with(rule, family, self.ipv6_bounds)?;
        let addr = parse_candidate(candidate, family)?;
        Ok(rule.contains(addr))
    }
}

/// Check whether `candidate` falls inside `rule` using group-padding IPv6 bounds
pub fn matches(candidate: &str, rule: &str, family: AddressFamily) -> bool {
    AddressMatcher::new().matches(candidate, rule, family)
}

/// Check whether `candidate` falls inside `rule` under the given IPv6 bounds policy
pub fn matches_with(
    candidate: &str,
    rule: &str,
    family: AddressFamily,
    policy: Ipv6BoundsPolicy,
) -> bool {
    AddressMatcher::with_ipv6_bounds(policy).matches(candidate, rule, family)
}

/// Parse a candidate address strictly for the given family
pub fn parse_candidate(candidate: &str, family: AddressFamily) -> Result<IpAddr, MatchError> {
    let parsed = match family {
        AddressFamily::Ipv4 => candidate.parse::<Ipv4Addr>().map(IpAddr::V4).ok(),
        AddressFamily::Ipv6 => candidate.parse::<Ipv6Addr>().map(IpAddr::V6).ok(),
    };
    parsed.ok_or_else(|| MatchError::MalformedAddress {
        address: candidate.to_string(),
        family,
    })
}
