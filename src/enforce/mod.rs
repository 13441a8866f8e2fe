pub mod blocking;
pub mod emitter;
pub mod stream;

pub use blocking::PolicyEnforcementPoint;
pub use emitter::Emitter;
pub use stream::{enforce_stream, EnforcementMode, EnforcementOptions, StateCallback};

use thiserror::Error;

use crate::compile::{CompileError, ConstraintFailure};
use crate::domain::Verdict;

/// Gate state of one enforcement subscription.
///
/// Mutated only by the reconciler's decision handling, strictly before any
/// data event from the same tick is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementState {
    Initial,
    Permitted,
    Denied,
}

/// Terminal failures surfaced to the consumer of an enforced operation.
#[derive(Error, Debug)]
pub enum EnforcementError {
    /// The PDP did not permit the subscription (Indeterminate and
    /// NotApplicable deny like an explicit Deny).
    #[error("access denied: {verdict}")]
    Denied { verdict: Verdict },

    /// An obligation constraint had no registered provider.
    #[error(transparent)]
    UnhandledObligation(#[from] CompileError),

    /// An obligation handler failed at runtime.
    #[error(transparent)]
    ConstraintFailure(#[from] ConstraintFailure),

    /// The protected operation itself failed; the error has already been
    /// through the bundle's error-mapping chain.
    #[error("protected stream failed")]
    Stream(#[source] anyhow::Error),
}
