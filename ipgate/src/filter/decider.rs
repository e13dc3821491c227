//! Access decision capability consumed by request pipelines

use super::gate::{Decision, Verdict};
use super::request::AccessRequest;

/// Decides whether a request may proceed.
///
/// Implementations hold no per-request state, so one instance can be shared
/// across any number of concurrent connections.
pub trait AccessDecider: Send + Sync {
    /// Detailed outcome for a request
    fn decide(&self, request: &AccessRequest) -> Decision;

    /// Allow or deny a request
    fn evaluate(&self, request: &AccessRequest) -> Verdict {
        self.decide(request).verdict()
    }
}
