pub mod backoff;
pub mod client;
pub mod dedup;
pub mod framing;

pub use backoff::Backoff;
pub use client::PdpClient;
pub use dedup::DecisionDeduper;
pub use framing::{FrameError, LineFramer};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Decision, Subscription};

/// Snapshot of decisions for a multi-subscription, keyed by caller id.
pub type DecisionMap = BTreeMap<String, Decision>;

/// One per-id delta on a multi-subscription decision stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiableDecision {
    pub id: String,
    #[serde(flatten)]
    pub decision: Decision,
}

/// The decision source consumed by enforcement points.
///
/// Abstracts the remote PDP so tests and embedded PDPs can stand in for
/// the HTTP client. Both operations are fail-closed: implementations
/// surface trouble as `Indeterminate` decisions, never as errors.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    /// One decision for one subscription.
    async fn decide_once(&self, subscription: &Subscription) -> Decision;

    /// An infinite, restartable stream of decisions for one subscription,
    /// with consecutive duplicates already suppressed.
    fn decide(&self, subscription: &Subscription) -> BoxStream<'static, Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifiable_decision_wire_format() {
        let event: IdentifiableDecision = serde_json::from_value(json!({
            "id": "sub-1",
            "decision": "PERMIT",
            "obligations": [{"type": "log"}],
        }))
        .unwrap();

        assert_eq!(event.id, "sub-1");
        assert!(event.decision.verdict.is_permit());
        assert_eq!(event.decision.obligations.len(), 1);
    }
}
