//! Configuration management for the gate

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{AddressSource, AllowedIps, CommonConfig, Config, GateConfig, DEFAULT_LOGIN_URI};
pub use validator::{ConfigValidator, RuleWarning, RuleWarningKind};
