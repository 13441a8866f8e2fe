use std::collections::BTreeMap;

use crate::domain::decision::decisions_equal;
use crate::domain::Decision;

use super::DecisionMap;

/// Suppresses consecutive structurally-identical decisions so the
/// enforcement state machine only observes genuine changes.
#[derive(Default)]
pub struct DecisionDeduper {
    last: Option<Decision>,
}

impl DecisionDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the decision differs from the previous one and
    /// should be forwarded.
    pub fn accept(&mut self, decision: &Decision) -> bool {
        if self
            .last
            .as_ref()
            .is_some_and(|previous| decisions_equal(previous, decision))
        {
            return false;
        }
        self.last = Some(decision.clone());
        true
    }
}

/// Per-id duplicate suppression for multi-subscription streams.
#[derive(Default)]
pub struct MultiDeduper {
    last: BTreeMap<String, Decision>,
    snapshot_seen: bool,
}

impl MultiDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this id's decision changed.
    pub fn accept(&mut self, id: &str, decision: &Decision) -> bool {
        if self
            .last
            .get(id)
            .is_some_and(|previous| decisions_equal(previous, decision))
        {
            return false;
        }
        self.last.insert(id.to_string(), decision.clone());
        true
    }

    /// Returns true if the snapshot differs from the previous one. The
    /// first snapshot is always forwarded, even an empty one.
    pub fn accept_map(&mut self, snapshot: &DecisionMap) -> bool {
        let unchanged = self.snapshot_seen
            && self.last.len() == snapshot.len()
            && snapshot
                .iter()
                .all(|(id, d)| self.last.get(id).is_some_and(|prev| decisions_equal(prev, d)));
        if unchanged {
            return false;
        }
        self.snapshot_seen = true;
        self.last = snapshot.clone();
        true
    }
}
