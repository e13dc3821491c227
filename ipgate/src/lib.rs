//! IP allow-list gate for protected backend paths
//!
//! Decides whether a client address may reach a protected path prefix, given
//! IPv4 and IPv6 allow rules in CIDR, netmask, wildcard or range syntax.

pub mod config;
pub mod error;
pub mod filter;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, ConfigValidator, GateConfig};
pub use error::{GateError, MatchError, Result, ValidationError};
pub use filter::{
    matches, matches_with, AccessDecider, AccessGate, AccessRequest, AddressFamily,
    AddressMatcher, AllowListConfig, Decision, Ipv6BoundsPolicy, RequestMeta, Rule, Verdict,
};
