use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use super::Constraint;

/// Authorization verdict returned by the PDP.
///
/// Everything other than `Permit` denies access. `Indeterminate` is what
/// every failure mode inside the decision feed collapses to, so the
/// enforcement layer only ever sees a valid verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

impl Verdict {
    /// Returns true if this verdict grants access.
    #[inline]
    pub fn is_permit(&self) -> bool {
        *self == Verdict::Permit
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Permit => write!(f, "PERMIT"),
            Verdict::Deny => write!(f, "DENY"),
            Verdict::Indeterminate => write!(f, "INDETERMINATE"),
            Verdict::NotApplicable => write!(f, "NOT_APPLICABLE"),
        }
    }
}

/// One authorization decision from the PDP.
///
/// Immutable once parsed: produced per decision-feed event, consumed by the
/// constraint compiler, then discarded. The `resource` field distinguishes
/// "absent" from an explicit `null`; when present it unconditionally
/// replaces the protected payload, null included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    pub verdict: Verdict,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Constraint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<Constraint>,

    /// Replacement payload. `None` = field absent, `Some(Value::Null)` =
    /// explicit null replacement.
    #[serde(
        default,
        deserialize_with = "present_or_absent",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource: Option<Value>,
}

/// Maps a present JSON value (null included) to `Some`, so field absence
/// stays distinguishable from an explicit null.
fn present_or_absent<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Decision {
    /// Create a bare decision with the given verdict.
    pub fn new(verdict: Verdict) -> Self {
        Decision {
            verdict,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: None,
        }
    }

    /// Permit without constraints.
    #[inline]
    pub fn permit() -> Self {
        Decision::new(Verdict::Permit)
    }

    /// Deny without constraints.
    #[inline]
    pub fn deny() -> Self {
        Decision::new(Verdict::Deny)
    }

    /// The fail-closed decision: PDP unreachable or response invalid.
    #[inline]
    pub fn indeterminate() -> Self {
        Decision::new(Verdict::Indeterminate)
    }

    /// No policy applied to the subscription.
    #[inline]
    pub fn not_applicable() -> Self {
        Decision::new(Verdict::NotApplicable)
    }

    /// Add an obligation constraint.
    pub fn with_obligation(mut self, constraint: Constraint) -> Self {
        self.obligations.push(constraint);
        self
    }

    /// Add an advice constraint.
    pub fn with_advice(mut self, constraint: Constraint) -> Self {
        self.advice.push(constraint);
        self
    }

    /// Attach a replacement resource (explicit null allowed).
    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Depth bound for structural decision comparison. Constraints nested
/// deeper than this compare unequal, so duplicate suppression fails open
/// toward delivering the event.
const EQUALITY_DEPTH: usize = 8;

/// Bounded-depth structural equality between two decisions.
///
/// Used by the decision feed to suppress consecutive duplicates before they
/// reach the enforcement state machine.
pub fn decisions_equal(a: &Decision, b: &Decision) -> bool {
    if a.verdict != b.verdict {
        return false;
    }
    if a.obligations.len() != b.obligations.len() || a.advice.len() != b.advice.len() {
        return false;
    }
    let values_eq = |x: &Value, y: &Value| values_equal(x, y, EQUALITY_DEPTH);
    match (&a.resource, &b.resource) {
        (None, None) => {}
        (Some(x), Some(y)) if values_eq(x, y) => {}
        _ => return false,
    }
    a.obligations.iter().zip(&b.obligations).all(|(x, y)| values_eq(x, y))
        && a.advice.iter().zip(&b.advice).all(|(x, y)| values_eq(x, y))
}

fn values_equal(a: &Value, b: &Value, depth: usize) -> bool {
    if depth == 0 {
        return false;
    }
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y, depth - 1))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(k, x)| {
                    ys.get(k).is_some_and(|y| values_equal(x, y, depth - 1))
                })
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_wire_format() {
        let json = serde_json::to_string(&Verdict::NotApplicable).unwrap();
        assert_eq!(json, "\"NOT_APPLICABLE\"");

        let parsed: Verdict = serde_json::from_str("\"INDETERMINATE\"").unwrap();
        assert_eq!(parsed, Verdict::Indeterminate);
    }

    #[test]
    fn test_decision_parse_minimal() {
        let decision: Decision = serde_json::from_str(r#"{"decision":"PERMIT"}"#).unwrap();
        assert_eq!(decision.verdict, Verdict::Permit);
        assert!(decision.obligations.is_empty());
        assert!(decision.advice.is_empty());
        assert!(decision.resource.is_none());
    }

    #[test]
    fn test_resource_null_is_present() {
        let decision: Decision =
            serde_json::from_str(r#"{"decision":"PERMIT","resource":null}"#).unwrap();
        assert_eq!(decision.resource, Some(Value::Null));

        let absent: Decision = serde_json::from_str(r#"{"decision":"PERMIT"}"#).unwrap();
        assert_eq!(absent.resource, None);
    }

    #[test]
    fn test_decision_parse_constraints() {
        let decision: Decision = serde_json::from_value(json!({
            "decision": "PERMIT",
            "obligations": [{"type": "log_access"}],
            "advice": [{"type": "notify"}],
        }))
        .unwrap();

        assert_eq!(decision.obligations.len(), 1);
        assert_eq!(decision.advice.len(), 1);
        assert_eq!(decision.obligations[0]["type"], "log_access");
    }

    #[test]
    fn test_invalid_verdict_rejected() {
        let result: Result<Decision, _> = serde_json::from_str(r#"{"decision":"MAYBE"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decisions_equal_structural() {
        let a = Decision::permit().with_obligation(json!({"type": "log", "level": "info"}));
        let b = Decision::permit().with_obligation(json!({"level": "info", "type": "log"}));
        assert!(decisions_equal(&a, &b)); // key order irrelevant

        let c = Decision::permit().with_obligation(json!({"type": "log", "level": "warn"}));
        assert!(!decisions_equal(&a, &c));
    }

    #[test]
    fn test_decisions_equal_resource_presence() {
        let explicit_null = Decision::permit().with_resource(Value::Null);
        let absent = Decision::permit();
        assert!(!decisions_equal(&explicit_null, &absent));
        assert!(decisions_equal(&explicit_null, &explicit_null.clone()));
    }

    #[test]
    fn test_equality_depth_fails_open() {
        fn nest(depth: usize) -> Value {
            let mut v = json!(1);
            for _ in 0..depth {
                v = json!({ "inner": v });
            }
            v
        }

        let a = Decision::permit().with_obligation(nest(20));
        let b = Decision::permit().with_obligation(nest(20));
        // Too deep to prove equal, so treated as distinct.
        assert!(!decisions_equal(&a, &b));
    }
}
