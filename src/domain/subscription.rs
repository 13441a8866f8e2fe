use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Authorization subscription sent to the PDP.
///
/// Subject, action and resource are free-form JSON: a string id, a
/// structured object, whatever the policy vocabulary expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subject: Value,
    pub action: Value,
    pub resource: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,

    /// Opaque credentials forwarded to the PDP, never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Value>,
}

impl Subscription {
    /// Create a subscription from subject, action and resource.
    pub fn new(
        subject: impl Into<Value>,
        action: impl Into<Value>,
        resource: impl Into<Value>,
    ) -> Self {
        Subscription {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            environment: None,
            secrets: None,
        }
    }

    /// Attach environment attributes.
    pub fn with_environment(mut self, environment: impl Into<Value>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Attach secrets (forwarded verbatim, never logged).
    pub fn with_secrets(mut self, secrets: impl Into<Value>) -> Self {
        self.secrets = Some(secrets.into());
        self
    }
}

/// A batch of subscriptions keyed by caller-chosen ids.
///
/// BTreeMap keeps iteration (and therefore wire and snapshot ordering)
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiSubscription {
    pub subscriptions: BTreeMap<String, Subscription>,
}

impl MultiSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription under the given id, replacing any previous one.
    pub fn with(mut self, id: impl Into<String>, subscription: Subscription) -> Self {
        self.subscriptions.insert(id.into(), subscription);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }
}
