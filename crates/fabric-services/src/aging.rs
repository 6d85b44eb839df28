//! Aging keyed queues for beacon state that forgets itself.
//!
//! Entries are keyed by beacon UUID and kept in insertion order. The clock
//! is the timestamp embedded in the UUID itself: an entry is live while
//! that timestamp lies within `window` of now, in either direction. A
//! beacon from the far future is as suspect as one from the distant past.
//!
//! Every read that asks "is this still live" must be preceded by
//! `age_out`; `lookup` does both in one call.

use std::time::Duration;

use indexmap::IndexMap;
use uuid::Uuid;

use fabric_core::wire::uuid_timestamp;

/// Insertion-ordered `uuid → V` map with time-based eviction.
#[derive(Debug, Clone)]
pub struct AgingQueue<V> {
    entries: IndexMap<Uuid, V>,
    window: Duration,
}

impl<V> AgingQueue<V> {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Remove every entry whose UUID time is outside `now ± window`.
    ///
    /// Survivors keep their relative order. Returns how many were removed.
    pub fn age_out(&mut self, now: f64) -> usize {
        let window = self.window.as_secs_f64();
        let before = self.entries.len();
        self.entries.retain(|uuid, _| is_live(uuid, now, window));
        before - self.entries.len()
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn remember(&mut self, uuid: Uuid, value: V) -> Option<V> {
        self.entries.insert(uuid, value)
    }

    /// Age out, then look up.
    pub fn lookup(&mut self, uuid: &Uuid, now: f64) -> Option<&V> {
        self.age_out(now);
        self.entries.get(uuid)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&V> {
        self.entries.get(uuid)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.entries.contains_key(uuid)
    }

    pub fn get_or_insert_with(&mut self, uuid: Uuid, default: impl FnOnce() -> V) -> &mut V {
        self.entries.entry(uuid).or_insert_with(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &Uuid> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

impl<T> AgingQueue<Vec<T>> {
    /// Record one more receipt of `uuid` and report whether it was already
    /// seen. The check happens before the append: a first receipt is never
    /// a duplicate of itself.
    pub fn append_and_check_duplicate(&mut self, uuid: Uuid, item: T, now: f64) -> bool {
        // Age first so a stale receipt cannot make a fresh one look duplicated.
        self.age_out(now);
        let receipts = self.entries.entry(uuid).or_default();
        let duplicate = !receipts.is_empty();
        receipts.push(item);
        duplicate
    }
}

/// Whether a UUID's embedded time is within `window_secs` of `now`.
/// UUIDs without a timestamp are never live.
pub fn is_live(uuid: &Uuid, now: f64, window_secs: f64) -> bool {
    match uuid_timestamp(uuid) {
        Some(ts) => (ts - now).abs() <= window_secs,
        None => false,
    }
}
