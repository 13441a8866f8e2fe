use std::sync::Arc;

use futures::stream::BoxStream;
use futures::Stream;
use serde_json::Value;
use tracing::info;

use crate::compile::{CompileMode, ConstraintCompiler, ConstraintHandlerBundle};
use crate::domain::{Decision, InvocationContext, Subscription};
use crate::feed::PolicyDecisionPoint;
use crate::handlers::HandlerRegistry;

use super::stream::{enforce_stream, EnforcementOptions};
use super::EnforcementError;

/// Entry point the surrounding framework calls to enforce protected
/// operations: blocking pre/post enforcement for request/response calls,
/// and stream enforcement for long-lived data.
///
/// Holds only shared immutable state, so one instance serves any number of
/// concurrent invocations.
pub struct PolicyEnforcementPoint {
    pdp: Arc<dyn PolicyDecisionPoint>,
    compiler: ConstraintCompiler,
}

impl PolicyEnforcementPoint {
    pub fn new(pdp: Arc<dyn PolicyDecisionPoint>, registry: Arc<HandlerRegistry>) -> Self {
        PolicyEnforcementPoint {
            pdp,
            compiler: ConstraintCompiler::new(registry),
        }
    }

    pub fn compiler(&self) -> &ConstraintCompiler {
        &self.compiler
    }

    /// Enforce before the protected method runs.
    ///
    /// On permit: compiles a pre-enforce bundle, runs its on-decision
    /// hooks, rewrites the invocation arguments in place, and returns the
    /// bundle so the caller can pass the method's eventual result through
    /// [`ConstraintHandlerBundle::apply_on_next`].
    ///
    /// # Errors
    ///
    /// `Denied` when the PDP does not permit, `UnhandledObligation` /
    /// `ConstraintFailure` when the permit cannot be enforced.
    pub async fn pre_enforce(
        &self,
        subscription: &Subscription,
        ctx: &mut InvocationContext,
    ) -> Result<ConstraintHandlerBundle, EnforcementError> {
        let decision = self.pdp.decide_once(subscription).await;
        let bundle = self.permitted_bundle(&decision, CompileMode::PreEnforce)?;
        bundle.run_on_decision()?;
        bundle.run_method_invocation(ctx)?;
        Ok(bundle)
    }

    /// Enforce after the protected method returned, transforming its
    /// result through the decision's constraint pipeline.
    ///
    /// # Errors
    ///
    /// Same surface as [`Self::pre_enforce`].
    pub async fn post_enforce(
        &self,
        subscription: &Subscription,
        value: &Value,
    ) -> Result<Value, EnforcementError> {
        let decision = self.pdp.decide_once(subscription).await;
        let bundle = self.permitted_bundle(&decision, CompileMode::PostEnforce)?;
        bundle.run_on_decision()?;
        Ok(bundle.apply_on_next(value)?)
    }

    /// Enforce a long-lived protected stream under the given options. The
    /// wrapped operation starts lazily on the first permit.
    pub fn enforce<F>(
        &self,
        subscription: &Subscription,
        source: F,
        options: EnforcementOptions,
    ) -> impl Stream<Item = Result<Value, EnforcementError>> + Send + 'static
    where
        F: FnOnce() -> BoxStream<'static, Result<Value, anyhow::Error>> + Send + 'static,
    {
        let decisions = self.pdp.decide(subscription);
        enforce_stream(decisions, source, self.compiler.clone(), options)
    }

    /// Gate a decision: anything but a clean permit handles the decision's
    /// constraints best-effort and reports denial.
    fn permitted_bundle(
        &self,
        decision: &Decision,
        mode: CompileMode,
    ) -> Result<ConstraintHandlerBundle, EnforcementError> {
        if !decision.verdict.is_permit() {
            info!(verdict = %decision.verdict, "access denied");
            if let Ok(bundle) = self.compiler.compile(decision, CompileMode::BestEffort) {
                let _ = bundle.run_on_decision();
            }
            return Err(EnforcementError::Denied {
                verdict: decision.verdict,
            });
        }
        Ok(self.compiler.compile(decision, mode)?)
    }
}
