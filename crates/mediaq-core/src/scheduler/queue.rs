//! Wait list: queued jobs by descending priority, then submission order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct WaitKey {
    priority: Reverse<i32>,
    seq: u64,
    id: JobId,
}

/// A job appears at most once; `index` maps it to its current key.
#[derive(Debug, Default)]
pub(super) struct WaitList {
    keys: BTreeSet<WaitKey>,
    index: HashMap<JobId, WaitKey>,
}

impl WaitList {
    /// Returns false if `id` is already waiting.
    pub(super) fn push(&mut self, id: JobId, priority: i32, seq: u64) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        let key = WaitKey {
            priority: Reverse(priority),
            seq,
            id,
        };
        self.keys.insert(key);
        self.index.insert(id, key);
        true
    }

    pub(super) fn remove(&mut self, id: JobId) -> bool {
        match self.index.remove(&id) {
            Some(key) => self.keys.remove(&key),
            None => false,
        }
    }

    /// Best waiting job: highest priority, earliest submission.
    pub(super) fn pop(&mut self) -> Option<JobId> {
        let key = self.keys.pop_first()?;
        self.index.remove(&key.id);
        Some(key.id)
    }

    /// Re-rank a waiting job without touching its submission order.
    pub(super) fn reprioritize(&mut self, id: JobId, priority: i32) -> bool {
        let Some(key) = self.index.get(&id).copied() else {
            return false;
        };
        self.keys.remove(&key);
        let key = WaitKey {
            priority: Reverse(priority),
            ..key
        };
        self.keys.insert(key);
        self.index.insert(id, key);
        true
    }

    pub(super) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Waiting ids in dispatch order.
    pub(super) fn ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.keys.iter().map(|k| k.id)
    }
}
