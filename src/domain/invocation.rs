use serde_json::Value;

/// The protected method's argument bundle on the pre-enforcement path.
///
/// Visible only to the operation's own invocation; method-invocation
/// handlers may rewrite arguments before the wrapped operation runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationContext {
    pub arguments: Vec<Value>,
}

impl InvocationContext {
    pub fn new(arguments: Vec<Value>) -> Self {
        InvocationContext { arguments }
    }

    /// Replace the argument at `index`, ignoring out-of-range indices.
    pub fn set_argument(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.arguments.get_mut(index) {
            *slot = value;
        }
    }
}
