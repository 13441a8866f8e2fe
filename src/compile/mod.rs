pub mod bundle;

pub use bundle::ConstraintHandlerBundle;

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::domain::{Constraint, Decision};
use crate::handlers::{HandlerRegistry, Signal};

use bundle::Guarded;

/// How a bundle is going to be used; governs which handler capabilities
/// are selected and whether compilation may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Request path, before the protected method runs; additionally
    /// compiles method-invocation handlers.
    PreEnforce,
    /// Response path, after the protected method returned.
    PostEnforce,
    /// Deny path: the outcome is already decided, so handler problems are
    /// only logged. Never fails.
    BestEffort,
    /// Long-lived stream enforcement; adds on-complete/on-cancel handlers.
    Streaming,
    /// Deny path of a stream enforcement.
    StreamingBestEffort,
}

impl CompileMode {
    /// Streaming modes additionally select on-complete/on-cancel runnables.
    pub fn is_streaming(&self) -> bool {
        matches!(self, CompileMode::Streaming | CompileMode::StreamingBestEffort)
    }

    /// Best-effort modes never fail: unclaimed obligations are tolerated
    /// and every handler runs with advice semantics.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, CompileMode::BestEffort | CompileMode::StreamingBestEffort)
    }

    fn includes_invocation(&self) -> bool {
        matches!(self, CompileMode::PreEnforce)
    }
}

/// Whether a constraint must be honored or should be honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Obligation,
    Advice,
}

/// Compilation failed; the caller must treat the decision as a deny.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("no provider claims obligation constraint of type {constraint_type:?}")]
    UnhandledObligation { constraint_type: String },
}

/// An obligation handler failed at runtime; the caller must treat the
/// enforcement as denied.
#[derive(Error, Debug)]
#[error("obligation handler for constraint type {constraint_type:?} failed")]
pub struct ConstraintFailure {
    pub constraint_type: String,
    #[source]
    pub source: anyhow::Error,
}

/// Compiles a decision's obligation/advice constraints into an executable
/// [`ConstraintHandlerBundle`] by matching each constraint against the
/// registered providers.
///
/// Allocates a fresh bundle per decision; holds no mutable state, so one
/// compiler serves any number of concurrent subscriptions.
#[derive(Clone)]
pub struct ConstraintCompiler {
    registry: Arc<HandlerRegistry>,
}

impl ConstraintCompiler {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        ConstraintCompiler { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Compile one decision into a bundle.
    ///
    /// Obligations are processed first; any obligation no provider claims
    /// fails the whole compilation (deny-by-default), except in best-effort
    /// modes. Advice constraints carry no such requirement.
    ///
    /// # Errors
    ///
    /// [`CompileError::UnhandledObligation`] when an obligation constraint
    /// is claimed by no provider and the mode is not best-effort.
    pub fn compile(
        &self,
        decision: &Decision,
        mode: CompileMode,
    ) -> Result<ConstraintHandlerBundle, CompileError> {
        let mut bundle = ConstraintHandlerBundle::empty(decision.resource.clone());
        let mut mappings = Vec::new();
        let mut error_mappings = Vec::new();
        let mut unclaimed: BTreeSet<usize> = (0..decision.obligations.len()).collect();

        for (source_kind, constraints) in [
            (ConstraintKind::Obligation, &decision.obligations),
            (ConstraintKind::Advice, &decision.advice),
        ] {
            // Best-effort compilation demotes everything to advice
            // semantics so the deny path can never fail again.
            let kind = if mode.is_best_effort() {
                ConstraintKind::Advice
            } else {
                source_kind
            };

            for (index, constraint) in constraints.iter().enumerate() {
                let claimed = self.collect(
                    constraint,
                    kind,
                    mode,
                    &mut bundle,
                    &mut mappings,
                    &mut error_mappings,
                );
                if claimed && source_kind == ConstraintKind::Obligation {
                    unclaimed.remove(&index);
                }
            }
        }

        if !mode.is_best_effort() {
            if let Some(&index) = unclaimed.first() {
                let constraint_type = constraint_type_of(&decision.obligations[index]).to_string();
                warn!(constraint_type = %constraint_type, "unhandled obligation, denying");
                return Err(CompileError::UnhandledObligation { constraint_type });
            }
        }

        // Descending priority, stable: ties keep obligation-before-advice
        // and registration order.
        mappings.sort_by(|a: &(i32, _), b: &(i32, _)| b.0.cmp(&a.0));
        error_mappings.sort_by(|a: &(i32, _), b: &(i32, _)| b.0.cmp(&a.0));
        bundle.mappings = mappings.into_iter().map(|(_, guarded)| guarded).collect();
        bundle.error_mappings = error_mappings.into_iter().map(|(_, guarded)| guarded).collect();

        Ok(bundle)
    }

    /// Match one constraint against every capability, pushing compiled
    /// handlers into the bundle. Returns whether any provider claimed it.
    #[allow(clippy::type_complexity)]
    fn collect(
        &self,
        constraint: &Constraint,
        kind: ConstraintKind,
        mode: CompileMode,
        bundle: &mut ConstraintHandlerBundle,
        mappings: &mut Vec<(i32, Guarded<crate::handlers::MappingHandler>)>,
        error_mappings: &mut Vec<(i32, Guarded<crate::handlers::ErrorMappingHandler>)>,
    ) -> bool {
        let constraint_type = constraint_type_of(constraint);
        let mut claimed = false;

        fn guarded<H>(kind: ConstraintKind, constraint_type: &str, handler: H) -> Guarded<H> {
            Guarded {
                kind,
                constraint_type: constraint_type.to_string(),
                handler,
            }
        }

        for provider in self.registry.runnable() {
            if !provider.is_responsible(constraint) {
                continue;
            }
            // Signal-filtered selection: a handler whose signal the mode
            // does not run is not selected and does not claim.
            let slot = match provider.signal() {
                Signal::OnDecision => Some(&mut bundle.on_decision),
                Signal::OnComplete if mode.is_streaming() => Some(&mut bundle.on_complete),
                Signal::OnCancel if mode.is_streaming() => Some(&mut bundle.on_cancel),
                Signal::OnComplete | Signal::OnCancel => None,
            };
            if let Some(slot) = slot {
                claimed = true;
                slot.push(guarded(kind, constraint_type, provider.handler(constraint)));
            }
        }

        for provider in self.registry.consumer() {
            if provider.is_responsible(constraint) {
                claimed = true;
                bundle.consumers.push(guarded(kind, constraint_type, provider.handler(constraint)));
            }
        }

        for provider in self.registry.filter() {
            if provider.is_responsible(constraint) {
                claimed = true;
                bundle.filters.push(guarded(kind, constraint_type, provider.handler(constraint)));
            }
        }

        for provider in self.registry.mapping() {
            if provider.is_responsible(constraint) {
                claimed = true;
                mappings.push((provider.priority(), guarded(kind, constraint_type, provider.handler(constraint))));
            }
        }

        for provider in self.registry.error_handler() {
            if provider.is_responsible(constraint) {
                claimed = true;
                bundle
                    .error_consumers
                    .push(guarded(kind, constraint_type, provider.handler(constraint)));
            }
        }

        for provider in self.registry.error_mapping() {
            if provider.is_responsible(constraint) {
                claimed = true;
                error_mappings.push((provider.priority(), guarded(kind, constraint_type, provider.handler(constraint))));
            }
        }

        if mode.includes_invocation() {
            for provider in self.registry.invocation() {
                if provider.is_responsible(constraint) {
                    claimed = true;
                    bundle
                        .invocation
                        .push(guarded(kind, constraint_type, provider.handler(constraint)));
                }
            }
        }

        claimed
    }
}

fn constraint_type_of(constraint: &Constraint) -> &str {
    constraint
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("<untyped>")
}
