use serde_json::Value;
use std::fmt::Debug;

use crate::domain::{Constraint, InvocationContext};

/// Lifecycle point a runnable handler is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Signal {
    #[default]
    OnDecision,
    OnComplete,
    OnCancel,
}

/// Side effect run at a lifecycle signal.
pub type RunnableHandler = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Side effect run per data item.
pub type ConsumerHandler = Box<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Data item transform. Takes the value by reference so a failing handler
/// leaves the original available for the advice identity fallback.
pub type MappingHandler = Box<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// Side effect run when the protected stream errors.
pub type ErrorHandler = Box<dyn Fn(&anyhow::Error) -> anyhow::Result<()> + Send + Sync>;

/// Error transform; same by-reference contract as [`MappingHandler`].
pub type ErrorMappingHandler =
    Box<dyn Fn(&anyhow::Error) -> anyhow::Result<anyhow::Error> + Send + Sync>;

/// Keep/drop predicate over data items.
pub type FilterHandler = Box<dyn Fn(&Value) -> anyhow::Result<bool> + Send + Sync>;

/// Mutation of the protected method's arguments (pre-enforcement only).
pub type InvocationHandler =
    Box<dyn Fn(&mut InvocationContext) -> anyhow::Result<()> + Send + Sync>;

/// Common capability: decide whether a constraint belongs to this provider.
///
/// Providers are process-lifetime singletons registered once at startup;
/// the compiler only ever reads them.
pub trait Responsible: Send + Sync + Debug {
    fn is_responsible(&self, constraint: &Constraint) -> bool;
}

/// Provides a lifecycle side effect for claimed constraints.
pub trait RunnableProvider: Responsible {
    /// Which lifecycle point the handler runs at.
    fn signal(&self) -> Signal {
        Signal::OnDecision
    }

    /// Build the handler bound to this constraint.
    fn handler(&self, constraint: &Constraint) -> RunnableHandler;
}

/// Provides a per-item side effect for claimed constraints.
pub trait ConsumerProvider: Responsible {
    fn handler(&self, constraint: &Constraint) -> ConsumerHandler;
}

/// Provides a data transform for claimed constraints.
///
/// Transforms from all claiming providers are chained in descending
/// priority order; registration order breaks ties.
pub trait MappingProvider: Responsible {
    fn priority(&self) -> i32 {
        0
    }

    fn handler(&self, constraint: &Constraint) -> MappingHandler;
}

/// Provides an error side effect for claimed constraints.
pub trait ErrorHandlerProvider: Responsible {
    fn handler(&self, constraint: &Constraint) -> ErrorHandler;
}

/// Provides an error transform for claimed constraints; priority rules
/// match [`MappingProvider`].
pub trait ErrorMappingProvider: Responsible {
    fn priority(&self) -> i32 {
        0
    }

    fn handler(&self, constraint: &Constraint) -> ErrorMappingHandler;
}

/// Provides a keep/drop predicate for claimed constraints. Predicates
/// default to pass and are ANDed across all claiming providers.
pub trait FilterPredicateProvider: Responsible {
    fn handler(&self, constraint: &Constraint) -> FilterHandler;
}

/// Provides an argument mutation for claimed constraints (pre-enforcement
/// path only).
pub trait MethodInvocationProvider: Responsible {
    fn handler(&self, constraint: &Constraint) -> InvocationHandler;
}

/// Convenience matcher for the common `{"type": "..."}` discriminator.
pub fn constraint_type_is(constraint: &Constraint, expected: &str) -> bool {
    constraint
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t == expected)
}
