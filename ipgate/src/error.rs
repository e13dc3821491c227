//! Error types for gate configuration and address matching

use std::path::PathBuf;
use thiserror::Error;

use crate::filter::rule::AddressFamily;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid protected path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Duplicate address source rank: {rank}")]
    DuplicateRank { rank: i64 },

    #[error("Address source at rank {rank} has an empty lookup path")]
    EmptySourcePath { rank: i64 },
}

/// Why a single address/rule comparison could not be carried out.
///
/// Neither variant ever escapes gate evaluation; both resolve to "does not
/// match this rule".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Malformed rule {rule:?}: {reason}")]
    MalformedRule { rule: String, reason: &'static str },

    #[error("Malformed {family} address: {address:?}")]
    MalformedAddress {
        address: String,
        family: AddressFamily,
    },
}

impl MatchError {
    pub(crate) fn rule(rule: &str, reason: &'static str) -> Self {
        MatchError::MalformedRule {
            rule: rule.to_string(),
            reason,
        }
    }
}
