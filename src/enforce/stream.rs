use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::compile::{CompileMode, ConstraintCompiler, ConstraintHandlerBundle};
use crate::domain::{Decision, Verdict};

use super::emitter::Emitter;
use super::{EnforcementError, EnforcementState};

/// What a deny does to the enforced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    /// Any deny terminates the whole enforcement permanently with an
    /// access-denied failure.
    TillDenied,
    /// Deny silently pauses the gate; a later permit resumes without
    /// callbacks.
    DropWhileDenied,
    /// Like drop-while-denied, plus edge-triggered deny/recover callbacks
    /// that may inject synthetic events through a restricted emitter.
    Recoverable,
}

/// Callback fired on a gate transition; receives the triggering decision
/// and a restricted emitter that can only inject values.
pub type StateCallback = Arc<dyn Fn(&Decision, &Emitter) + Send + Sync>;

/// Per-subscription enforcement configuration.
#[derive(Clone)]
pub struct EnforcementOptions {
    pub mode: EnforcementMode,
    pub on_deny: Option<StateCallback>,
    pub on_recover: Option<StateCallback>,
}

impl EnforcementOptions {
    pub fn till_denied() -> Self {
        EnforcementOptions {
            mode: EnforcementMode::TillDenied,
            on_deny: None,
            on_recover: None,
        }
    }

    pub fn drop_while_denied() -> Self {
        EnforcementOptions {
            mode: EnforcementMode::DropWhileDenied,
            on_deny: None,
            on_recover: None,
        }
    }

    pub fn recoverable() -> Self {
        EnforcementOptions {
            mode: EnforcementMode::Recoverable,
            on_deny: None,
            on_recover: None,
        }
    }

    pub fn with_on_deny(mut self, callback: StateCallback) -> Self {
        self.on_deny = Some(callback);
        self
    }

    pub fn with_on_recover(mut self, callback: StateCallback) -> Self {
        self.on_recover = Some(callback);
        self
    }

    fn fires_deny_callback(&self) -> bool {
        matches!(
            self.mode,
            EnforcementMode::TillDenied | EnforcementMode::Recoverable
        )
    }
}

/// Shared slot holding the current bundle. The generator owns all writes;
/// the cancel guard reads it exactly once, on drop.
type BundleSlot = Arc<Mutex<Option<ConstraintHandlerBundle>>>;

/// Runs on-cancel hooks when the consumer drops the enforced stream before
/// it terminates. Taking the slot makes it a no-op after completion,
/// error, or deny-termination, and idempotent in every case.
struct CancelGuard {
    slot: BundleSlot,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(bundle) = self.slot.lock().take() {
            debug!("enforcement cancelled, running on-cancel handlers");
            if let Err(failure) = bundle.run_on_cancel() {
                warn!(error = %failure, "on-cancel handler failed during teardown");
            }
        }
    }
}

/// Merge a decision feed with a protected data stream into an enforced
/// output stream.
///
/// The wrapped operation is started lazily, on the first permit, and never
/// restarted — later decision flips gate the existing stream. One
/// cooperative task owns the whole state machine: decisions are polled
/// with priority and each decision's gate transition and callbacks finish
/// before the next data item is even polled, so no observer can correlate
/// data cessation with the data source's own timing.
pub fn enforce_stream<F>(
    decisions: BoxStream<'static, Decision>,
    source: F,
    compiler: ConstraintCompiler,
    options: EnforcementOptions,
) -> impl Stream<Item = Result<Value, EnforcementError>> + Send + 'static
where
    F: FnOnce() -> BoxStream<'static, Result<Value, anyhow::Error>> + Send + 'static,
{
    stream! {
        let slot: BundleSlot = Arc::new(Mutex::new(None));
        let emitter = Emitter::new();

        let mut decisions = decisions.fuse();
        let mut data: BoxStream<'static, Result<Value, anyhow::Error>> =
            futures::stream::pending().boxed();
        let mut factory = Some(source);
        let mut started = false;
        let mut state = EnforcementState::Initial;

        // Declared last so it drops first: on a consumer cancel, the
        // on-cancel hooks run before either upstream is released.
        let _guard = CancelGuard { slot: slot.clone() };

        loop {
            // The select only picks the next event; all processing (and
            // every yield) happens below, before the streams are polled
            // again. Decisions take priority over data so a gate change is
            // fully applied before the next item is even pulled.
            let event = tokio::select! {
                biased;

                maybe_decision = decisions.next(), if !decisions.is_done() => {
                    match maybe_decision {
                        Some(decision) => Event::Decision(decision),
                        None => continue, // feed exhausted; is_done() now true
                    }
                }

                maybe_item = data.next(), if started => Event::Data(maybe_item),

                // Decision feed exhausted before any permit: nothing can
                // ever pass the gate, complete the output.
                else => {
                    slot.lock().take();
                    return;
                }
            };

            match event {
                Event::Decision(decision) => {
                    let permitted = decision.verdict.is_permit()
                        && install_bundle(&compiler, &decision, &slot);

                    if permitted {
                        let was_denied = state == EnforcementState::Denied;
                        state = EnforcementState::Permitted;
                        if let Some(start) = factory.take() {
                            data = start();
                            started = true;
                        }
                        if was_denied && options.mode == EnforcementMode::Recoverable {
                            if let Some(callback) = &options.on_recover {
                                callback(&decision, &emitter);
                                for value in emitter.drain() {
                                    yield Ok(value);
                                }
                            }
                        }
                    } else {
                        // Deny, Indeterminate, NotApplicable, or a permit
                        // whose bundle failed: best-effort handling of the
                        // decision's constraints, then gate shut.
                        if let Ok(bundle) =
                            compiler.compile(&decision, CompileMode::StreamingBestEffort)
                        {
                            let _ = bundle.run_on_decision();
                        }
                        slot.lock().take();
                        let was_denied = state == EnforcementState::Denied;
                        state = EnforcementState::Denied;

                        if !was_denied && options.fires_deny_callback() {
                            if let Some(callback) = &options.on_deny {
                                callback(&decision, &emitter);
                                for value in emitter.drain() {
                                    yield Ok(value);
                                }
                            }
                        }

                        if options.mode == EnforcementMode::TillDenied {
                            // A permit that failed enforcement reports as
                            // Indeterminate, not as a permitted denial.
                            let verdict = if decision.verdict.is_permit() {
                                Verdict::Indeterminate
                            } else {
                                decision.verdict
                            };
                            yield Err(EnforcementError::Denied { verdict });
                            return;
                        }
                    }
                }

                Event::Data(Some(Ok(item))) => {
                    if state != EnforcementState::Permitted {
                        continue; // gate shut: drop silently
                    }
                    let applied = slot.lock().as_ref().map(|b| b.apply_on_next(&item));
                    match applied {
                        None => continue, // no bundle: drop
                        Some(Ok(value)) => yield Ok(value),
                        Some(Err(failure)) => {
                            if options.mode == EnforcementMode::TillDenied {
                                slot.lock().take();
                                yield Err(failure.into());
                                return;
                            }
                            // Handler failure gates the stream like a
                            // deny; the offending item is dropped.
                            warn!(error = %failure, "on-next handling failed, gating stream");
                            slot.lock().take();
                            let was_denied = state == EnforcementState::Denied;
                            state = EnforcementState::Denied;
                            if !was_denied && options.fires_deny_callback() {
                                if let Some(callback) = &options.on_deny {
                                    callback(&Decision::indeterminate(), &emitter);
                                    for value in emitter.drain() {
                                        yield Ok(value);
                                    }
                                }
                            }
                        }
                    }
                }

                Event::Data(Some(Err(err))) => {
                    let mapped = {
                        let current = slot.lock();
                        match current.as_ref() {
                            Some(bundle) => bundle.apply_on_error(err),
                            None => err,
                        }
                    };
                    slot.lock().take();
                    yield Err(EnforcementError::Stream(mapped));
                    return;
                }

                Event::Data(None) => {
                    let completed = slot.lock().take();
                    if let Some(bundle) = completed {
                        if let Err(failure) = bundle.run_on_complete() {
                            yield Err(failure.into());
                            return;
                        }
                    }
                    return;
                }
            }
        }
    }
}

/// One merged event picked by the reconciler's select.
enum Event {
    Decision(Decision),
    Data(Option<Result<Value, anyhow::Error>>),
}

/// Compile and activate a streaming bundle for a permit. Returns false
/// (treat as deny) when compilation or the on-decision hook fails.
fn install_bundle(
    compiler: &ConstraintCompiler,
    decision: &Decision,
    slot: &BundleSlot,
) -> bool {
    match compiler.compile(decision, CompileMode::Streaming) {
        Ok(bundle) => match bundle.run_on_decision() {
            Ok(()) => {
                *slot.lock() = Some(bundle);
                true
            }
            Err(failure) => {
                warn!(error = %failure, "on-decision hook failed, treating permit as deny");
                false
            }
        },
        Err(err) => {
            warn!(error = %err, "permit bundle compilation failed, treating as deny");
            false
        }
    }
}
