use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Restricted emitter handed to deny/recover callbacks.
///
/// Exposes only `emit`: user code may inject synthetic events (for example
/// an "access suspended" marker) into the enforced output, but can never
/// error or complete it — stream lifecycle stays under reconciler control.
#[derive(Clone, Default)]
pub struct Emitter {
    queue: Arc<Mutex<VecDeque<Value>>>,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a value for emission into the enforced output, after the
    /// callback returns and before any further data event is processed.
    pub fn emit(&self, value: Value) {
        self.queue.lock().push_back(value);
    }

    /// Drain everything queued so far, in emission order.
    pub(crate) fn drain(&self) -> Vec<Value> {
        self.queue.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_then_drain_in_order() {
        let emitter = Emitter::new();
        emitter.emit(json!(1));
        emitter.emit(json!(2));

        assert_eq!(emitter.drain(), vec![json!(1), json!(2)]);
        assert!(emitter.drain().is_empty());
    }
}
