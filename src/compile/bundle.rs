use serde_json::Value;
use tracing::{error, warn};

use crate::domain::InvocationContext;
use crate::handlers::{
    ConsumerHandler, ErrorHandler, ErrorMappingHandler, FilterHandler, InvocationHandler,
    MappingHandler, RunnableHandler,
};

use super::{ConstraintFailure, ConstraintKind};

/// One compiled handler together with the failure semantics of the
/// constraint it came from.
pub(super) struct Guarded<H> {
    pub(super) kind: ConstraintKind,
    pub(super) constraint_type: String,
    pub(super) handler: H,
}

impl<H> Guarded<H> {
    /// Resolve a handler outcome against the constraint kind: obligation
    /// failures raise, advice failures are logged and swallowed.
    fn guard<T>(&self, outcome: anyhow::Result<T>, fallback: impl FnOnce() -> T) -> Result<T, ConstraintFailure> {
        match outcome {
            Ok(value) => Ok(value),
            Err(source) => match self.kind {
                ConstraintKind::Obligation => {
                    error!(
                        constraint_type = %self.constraint_type,
                        error = %source,
                        "obligation handler failed"
                    );
                    Err(ConstraintFailure {
                        constraint_type: self.constraint_type.clone(),
                        source,
                    })
                }
                ConstraintKind::Advice => {
                    warn!(
                        constraint_type = %self.constraint_type,
                        error = %source,
                        "advice handler failed, continuing"
                    );
                    Ok(fallback())
                }
            },
        }
    }
}

/// Compiled, decision-scoped set of enforcement closures.
///
/// Immutable once compiled; owned by exactly one enforcement invocation and
/// replaced whole when the next decision arrives. Which handler sets are
/// populated depends on the [`CompileMode`](super::CompileMode): streaming
/// modes add on-complete/on-cancel runnables, pre-enforce adds
/// method-invocation handlers.
pub struct ConstraintHandlerBundle {
    pub(super) on_decision: Vec<Guarded<RunnableHandler>>,
    pub(super) on_complete: Vec<Guarded<RunnableHandler>>,
    pub(super) on_cancel: Vec<Guarded<RunnableHandler>>,
    pub(super) invocation: Vec<Guarded<InvocationHandler>>,
    pub(super) consumers: Vec<Guarded<ConsumerHandler>>,
    pub(super) filters: Vec<Guarded<FilterHandler>>,
    pub(super) mappings: Vec<Guarded<MappingHandler>>,
    pub(super) error_consumers: Vec<Guarded<ErrorHandler>>,
    pub(super) error_mappings: Vec<Guarded<ErrorMappingHandler>>,
    pub(super) resource: Option<Value>,
}

impl std::fmt::Debug for ConstraintHandlerBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintHandlerBundle")
            .field("on_decision", &self.on_decision.len())
            .field("on_complete", &self.on_complete.len())
            .field("on_cancel", &self.on_cancel.len())
            .field("invocation", &self.invocation.len())
            .field("consumers", &self.consumers.len())
            .field("filters", &self.filters.len())
            .field("mappings", &self.mappings.len())
            .field("error_consumers", &self.error_consumers.len())
            .field("error_mappings", &self.error_mappings.len())
            .field("resource", &self.resource)
            .finish()
    }
}

impl ConstraintHandlerBundle {
    pub(super) fn empty(resource: Option<Value>) -> Self {
        ConstraintHandlerBundle {
            on_decision: Vec::new(),
            on_complete: Vec::new(),
            on_cancel: Vec::new(),
            invocation: Vec::new(),
            consumers: Vec::new(),
            filters: Vec::new(),
            mappings: Vec::new(),
            error_consumers: Vec::new(),
            error_mappings: Vec::new(),
            resource,
        }
    }

    /// Run all on-decision side effects in compilation order.
    pub fn run_on_decision(&self) -> Result<(), ConstraintFailure> {
        run_all(&self.on_decision)
    }

    /// Run on-complete side effects (no-op unless compiled for streaming).
    pub fn run_on_complete(&self) -> Result<(), ConstraintFailure> {
        run_all(&self.on_complete)
    }

    /// Run on-cancel side effects (no-op unless compiled for streaming).
    pub fn run_on_cancel(&self) -> Result<(), ConstraintFailure> {
        run_all(&self.on_cancel)
    }

    /// Mutate the invocation context in place, obligations before advice,
    /// each in registration order. Pre-enforce bundles only; a no-op for
    /// every other mode.
    pub fn run_method_invocation(
        &self,
        ctx: &mut InvocationContext,
    ) -> Result<(), ConstraintFailure> {
        for guarded in &self.invocation {
            guarded.guard((guarded.handler)(ctx), || ())?;
        }
        Ok(())
    }

    /// Apply the full on-next pipeline to one data item:
    /// resource substitution, then filtering, then consumer side effects,
    /// then the mapping chain. Never mutates the input.
    pub fn apply_on_next(&self, value: &Value) -> Result<Value, ConstraintFailure> {
        // Resource replacement comes first: a decision-attached resource
        // (explicit null included) wins over the protected payload.
        let mut current = match &self.resource {
            Some(replacement) => replacement.clone(),
            None => value.clone(),
        };

        current = self.filter(current)?;

        for guarded in &self.consumers {
            guarded.guard((guarded.handler)(&current), || ())?;
        }

        for guarded in &self.mappings {
            current = guarded.guard((guarded.handler)(&current), || current.clone())?;
        }

        Ok(current)
    }

    /// Run error side effects, then the error-mapping chain, returning the
    /// (possibly replaced) error for the caller to propagate.
    ///
    /// An obligation failure on this path replaces the in-flight error with
    /// the constraint failure, since the denial must win over whatever the
    /// stream was about to report.
    pub fn apply_on_error(&self, err: anyhow::Error) -> anyhow::Error {
        for guarded in &self.error_consumers {
            if let Err(failure) = guarded.guard((guarded.handler)(&err), || ()) {
                return failure.into();
            }
        }

        let mut current = err;
        for guarded in &self.error_mappings {
            match (guarded.handler)(&current) {
                Ok(mapped) => current = mapped,
                Err(source) => match guarded.kind {
                    ConstraintKind::Obligation => {
                        error!(
                            constraint_type = %guarded.constraint_type,
                            error = %source,
                            "obligation error-mapping failed"
                        );
                        return ConstraintFailure {
                            constraint_type: guarded.constraint_type.clone(),
                            source,
                        }
                        .into();
                    }
                    ConstraintKind::Advice => {
                        warn!(
                            constraint_type = %guarded.constraint_type,
                            error = %source,
                            "advice error-mapping failed, keeping error"
                        );
                    }
                },
            }
        }
        current
    }

    /// True if a decision-attached resource will replace data items.
    pub fn replaces_resource(&self) -> bool {
        self.resource.is_some()
    }

    /// Filter stage: sequences are filtered element-wise, scalars are
    /// nulled out when any predicate rejects them. Predicates are ANDed;
    /// advice predicate failures default to pass.
    fn filter(&self, value: Value) -> Result<Value, ConstraintFailure> {
        if self.filters.is_empty() {
            return Ok(value);
        }

        match value {
            Value::Array(items) => {
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    if self.passes(&item)? {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            scalar => {
                if self.passes(&scalar)? {
                    Ok(scalar)
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    fn passes(&self, value: &Value) -> Result<bool, ConstraintFailure> {
        for guarded in &self.filters {
            if !guarded.guard((guarded.handler)(value), || true)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn run_all(handlers: &[Guarded<RunnableHandler>]) -> Result<(), ConstraintFailure> {
    for guarded in handlers {
        guarded.guard((guarded.handler)(), || ())?;
    }
    Ok(())
}
