//! Address allow-list filtering logic

pub mod decider;
pub mod gate;
pub mod matcher;
pub mod request;
pub mod rule;

pub use decider::AccessDecider;
pub use gate::{AccessGate, AllowListConfig, BypassReason, ConfiguredRule, Decision, MatchKind, Verdict};
pub use matcher::{matches, matches_with, AddressMatcher};
pub use request::{AccessRequest, MetaValue, RequestMeta};
pub use rule::{AddressFamily, Ipv6BoundsPolicy, Rule};
