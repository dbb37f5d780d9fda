//! The global ordered index: every live bundle by `(priority, uid)`.

use std::collections::{BTreeSet, HashMap};

use reclaimd_core::Uid;

#[derive(Debug, Default)]
pub struct PriorityIndex {
    order: BTreeSet<(i32, Uid)>,
    positions: HashMap<Uid, i32>,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `uid` at `priority`, removing any previous entry for it.
    pub fn upsert(&mut self, uid: Uid, priority: i32) {
        if let Some(old) = self.positions.insert(uid, priority) {
            self.order.remove(&(old, uid));
        }
        self.order.insert((priority, uid));
    }

    pub fn remove(&mut self, uid: Uid) -> Option<i32> {
        let old = self.positions.remove(&uid)?;
        self.order.remove(&(old, uid));
        Some(old)
    }

    pub fn priority_of(&self, uid: Uid) -> Option<i32> {
        self.positions.get(&uid).copied()
    }

    /// Most important first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (i32, Uid)> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Both internal views agree.
    pub(crate) fn is_consistent(&self) -> bool {
        self.order.len() == self.positions.len()
            && self.order.iter().all(|(p, uid)| self.positions.get(uid) == Some(p))
    }
}
