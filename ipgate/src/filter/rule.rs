//! Allow-list rule syntaxes
//!
//! A rule is configured as a plain string; its shape is inferred from the
//! characters it contains. IPv4 rules come in four shapes:
//!
//! | Shape            | Example                  |
//! |------------------|--------------------------|
//! | dotted netmask   | `10.0.0.0/255.255.0.0`   |
//! | prefix length    | `10.0.0.0/16`, `10.0/16` |
//! | wildcard         | `10.0.*.*`               |
//! | explicit range   | `10.0.0.1-10.0.0.50`     |
//!
//! IPv6 rules are CIDR only (`2001:db8::/32`). Their bounds are built from
//! the written groups, not from the prefix length: groups after the written
//! ones are zero-filled for the lower bound and `ffff`-filled for the upper
//! bound. See [`Ipv6BoundsPolicy`] for the stricter alternative.

use crate::error::MatchError;
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family a rule list or candidate address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Guess the family from the textual form: anything containing `:` is IPv6
    pub fn infer(address: &str) -> Self {
        if address.contains(':') {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "4" | "v4" | "ipv4" => Some(AddressFamily::Ipv4),
            "6" | "v6" | "ipv6" => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// How the bounds of an IPv6 CIDR rule are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv6BoundsPolicy {
    /// Bounds come from the written groups only; the prefix length is checked
    /// for syntax but otherwise ignored. `2001:db8::/48` therefore behaves
    /// like `2001:db8::/32`.
    #[default]
    GroupPadding,
    /// Bounds are the network and broadcast addresses of the literal prefix.
    Prefix,
}

impl Ipv6BoundsPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "group-padding" => Some(Ipv6BoundsPolicy::GroupPadding),
            "prefix" => Some(Ipv6BoundsPolicy::Prefix),
            _ => None,
        }
    }
}

impl fmt::Display for Ipv6BoundsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ipv6BoundsPolicy::GroupPadding => write!(f, "group-padding"),
            Ipv6BoundsPolicy::Prefix => write!(f, "prefix"),
        }
    }
}

/// A parsed allow-list rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// `base/dotted.netmask`
    CidrMask { base: u32, mask: u32 },
    /// `base/len`, base padded to four octets
    CidrPrefix(Ipv4Net),
    /// `a.b.*.*`, stored as its inclusive bounds
    Wildcard { lower: u32, upper: u32 },
    /// `lower-upper`, inclusive
    Range { lower: u32, upper: u32 },
    /// IPv6 `prefix/len` with precomputed inclusive bounds
    Ipv6Cidr {
        lower: u128,
        upper: u128,
        prefix_len: Option<u8>,
    },
    /// Anything unrecognised. Matches nothing.
    Invalid,
}

impl Rule {
    /// Parse a rule, folding any syntax problem into [`Rule::Invalid`]
    pub fn parse(raw: &str, family: AddressFamily) -> Self {
        Self::parse_with(raw, family, Ipv6BoundsPolicy::default())
    }

    pub fn parse_with(raw: &str, family: AddressFamily, policy: Ipv6BoundsPolicy) -> Self {
        Self::try_parse_with(raw, family, policy).unwrap_or(Rule::Invalid)
    }

    /// Parse a rule, reporting why it is malformed
    pub fn try_parse(raw: &str, family: AddressFamily) -> Result<Self, MatchError> {
        Self::try_parse_with(raw, family, Ipv6BoundsPolicy::default())
    }

    pub fn try_parse_with(
        raw: &str,
        family: AddressFamily,
        policy: Ipv6BoundsPolicy,
    ) -> Result<Self, MatchError> {
        match family {
            AddressFamily::Ipv4 => parse_ipv4_rule(raw),
            AddressFamily::Ipv6 => parse_ipv6_rule(raw, policy),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Rule::Invalid)
    }

    /// Short name of the rule shape
    pub fn kind(&self) -> &'static str {
        match self {
            Rule::CidrMask { .. } => "cidr-mask",
            Rule::CidrPrefix(_) => "cidr-prefix",
            Rule::Wildcard { .. } => "wildcard",
            Rule::Range { .. } => "range",
            Rule::Ipv6Cidr { .. } => "ipv6-cidr",
            Rule::Invalid => "invalid",
        }
    }

    /// Check an IPv4 address given as its unsigned 32-bit value
    pub fn contains_v4(&self, addr: u32) -> bool {
        match *self {
            Rule::CidrMask { base, mask } => addr & mask == base & mask,
            Rule::CidrPrefix(net) => net.contains(&Ipv4Addr::from(addr)),
            Rule::Wildcard { lower, upper } | Rule::Range { lower, upper } => {
                (lower..=upper).contains(&addr)
            }
            Rule::Ipv6Cidr { .. } | Rule::Invalid => false,
        }
    }

    /// Check an IPv6 address given as its unsigned 128-bit value
    pub fn contains_v6(&self, addr: u128) -> bool {
        match *self {
            Rule::Ipv6Cidr { lower, upper, .. } => (lower..=upper).contains(&addr),
            _ => false,
        }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.contains_v4(u32::from(v4)),
            IpAddr::V6(v6) => self.contains_v6(u128::from(v6)),
        }
    }
}

fn parse_ipv4_rule(raw: &str) -> Result<Rule, MatchError> {
    if let Some((base, mask)) = raw.split_once('/') {
        if mask.contains('.') {
            let mask = parse_ipv4(&mask.replace('*', "0"))
                .ok_or_else(|| MatchError::rule(raw, "netmask is not a dotted-quad address"))?;
            let base = parse_ipv4(base)
                .ok_or_else(|| MatchError::rule(raw, "base is not a dotted-quad address"))?;
            return Ok(Rule::CidrMask { base, mask });
        }

        let prefix_len: u8 = mask
            .parse()
            .map_err(|_| MatchError::rule(raw, "prefix length is not a number"))?;
        let base = padded_base(base)
            .ok_or_else(|| MatchError::rule(raw, "base has invalid octets"))?;
        let net = Ipv4Net::new(Ipv4Addr::from(base), prefix_len)
            .map_err(|_| MatchError::rule(raw, "prefix length exceeds 32"))?;
        return Ok(Rule::CidrPrefix(net));
    }

    if raw.contains('*') {
        if raw.contains('-') {
            return Err(MatchError::rule(raw, "wildcard cannot be combined with a range"));
        }
        let lower = parse_ipv4(&raw.replace('*', "0"));
        let upper = parse_ipv4(&raw.replace('*', "255"));
        return match (lower, upper) {
            (Some(lower), Some(upper)) => Ok(Rule::Wildcard { lower, upper }),
            _ => Err(MatchError::rule(raw, "wildcard does not form an address")),
        };
    }

    if let Some((lower, upper)) = raw.split_once('-') {
        return match (parse_ipv4(lower), parse_ipv4(upper)) {
            (Some(lower), Some(upper)) => Ok(Rule::Range { lower, upper }),
            _ => Err(MatchError::rule(raw, "range bound is not a dotted-quad address")),
        };
    }

    Err(MatchError::rule(raw, "no range syntax (expected '/', '*' or '-')"))
}

fn parse_ipv4(s: &str) -> Option<u32> {
    s.parse::<Ipv4Addr>().ok().map(u32::from)
}

/// `10.1/16` is read as `10.1.0.0/16`; empty octets count as zero
fn padded_base(base: &str) -> Option<u32> {
    let parts: Vec<&str> = base.split('.').collect();
    if parts.len() > 4 {
        return None;
    }

    let mut octets = [0u8; 4];
    for (octet, part) in octets.iter_mut().zip(&parts) {
        if !part.is_empty() {
            *octet = part.parse().ok()?;
        }
    }
    Some(u32::from_be_bytes(octets))
}

fn parse_ipv6_rule(raw: &str, policy: Ipv6BoundsPolicy) -> Result<Rule, MatchError> {
    let (left, prefix_len) = match raw.rsplit_once('/') {
        Some((left, prefix)) => {
            let len: u8 = prefix
                .parse()
                .map_err(|_| MatchError::rule(raw, "prefix length is not a number"))?;
            if len > 128 {
                return Err(MatchError::rule(raw, "prefix length exceeds 128"));
            }
            (left, Some(len))
        }
        None => (raw, None),
    };

    let (lower, upper) = match policy {
        Ipv6BoundsPolicy::GroupPadding => group_padded_bounds(raw, left)?,
        Ipv6BoundsPolicy::Prefix => {
            let len = prefix_len
                .ok_or_else(|| MatchError::rule(raw, "prefix length required"))?;
            let addr: Ipv6Addr = left
                .parse()
                .map_err(|_| MatchError::rule(raw, "network is not an IPv6 address"))?;
            let net = Ipv6Net::new(addr, len)
                .map_err(|_| MatchError::rule(raw, "prefix length exceeds 128"))?;
            (u128::from(net.network()), u128::from(net.broadcast()))
        }
    };

    Ok(Rule::Ipv6Cidr {
        lower,
        upper,
        prefix_len,
    })
}

/// Lower and upper bounds from the written groups of `left`.
///
/// Groups before `::` are taken as written, a single group after `::` pins
/// the last position, and every position in between is `0000` in the lower
/// bound and `ffff` in the upper bound.
fn group_padded_bounds(raw: &str, left: &str) -> Result<(u128, u128), MatchError> {
    let (head, tail) = match left.split_once("::") {
        Some((head, tail)) => (head, Some(tail).filter(|t| !t.trim().is_empty())),
        None => (left, None),
    };

    let head: Vec<u16> = if head.is_empty() {
        vec![0]
    } else {
        head.split(':')
            .map(parse_group)
            .collect::<Option<_>>()
            .ok_or_else(|| MatchError::rule(raw, "group is not 1-4 hex digits"))?
    };
    let tail = tail
        .map(|t| parse_group(t).ok_or_else(|| MatchError::rule(raw, "tail must be a single group")))
        .transpose()?;

    let positions = if tail.is_some() { 7 } else { 8 };
    if head.len() > positions {
        return Err(MatchError::rule(raw, "too many groups"));
    }

    let mut lower = [0x0000u16; 8];
    let mut upper = [0xffffu16; 8];
    lower[..head.len()].copy_from_slice(&head);
    upper[..head.len()].copy_from_slice(&head);
    if let Some(last) = tail {
        lower[7] = last;
        upper[7] = last;
    }

    Ok((
        u128::from(Ipv6Addr::from(lower)),
        u128::from(Ipv6Addr::from(upper)),
    ))
}

fn parse_group(group: &str) -> Option<u16> {
    if group.is_empty() || group.len() > 4 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(group, 16).ok()
}
