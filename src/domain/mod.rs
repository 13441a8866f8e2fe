pub mod decision;
pub mod invocation;
pub mod subscription;

pub use decision::{Decision, Verdict};
pub use invocation::InvocationContext;
pub use subscription::{MultiSubscription, Subscription};

/// Constraints are opaque JSON values; by convention they carry a `type`
/// discriminator, but only registered providers interpret them.
pub type Constraint = serde_json::Value;
