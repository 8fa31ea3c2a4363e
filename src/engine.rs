//! Reconciliation of the known app set against backend snapshots and deltas.
//!
//! The engine is the single owner of the app map and the rendered card grid.
//! Authoritative writes stamp entries from a monotonic counter; optimistic
//! writes do not, so a rollback can tell whether the server has since
//! overruled the guess. The counter never resets, so a stale guard cannot
//! collide with an entry recreated by a reconnect snapshot.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::models::{AppKey, AppRecord, Delta, DeltaKind};
use crate::render::{render_card, CardGrid, PendingAction};

struct Entry {
    record: AppRecord,
    version: u64,
}

/// Captures the pre-toggle state of an optimistic update so it can be
/// reverted if the scale request fails.
#[derive(Debug, Clone)]
pub struct OptimisticGuard {
    key: AppKey,
    prior: AppRecord,
    version: u64,
}

#[derive(Default)]
pub struct Engine {
    entries: HashMap<AppKey, Entry>,
    pending: HashMap<AppKey, PendingAction>,
    grid: CardGrid,
    next_version: u64,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &AppKey) -> Option<&AppRecord> {
        self.entries.get(key).map(|entry| &entry.record)
    }

    pub fn grid_html(&self) -> String {
        self.grid.to_html()
    }

    /// Replaces the entire known set. Cards are redrawn sorted by display
    /// name, case-insensitively with a raw tiebreak.
    pub fn apply_snapshot(&mut self, mut records: Vec<AppRecord>) {
        debug!("applying snapshot with {} apps", records.len());

        records.sort_by(|a, b| {
            let a_name = a.display_name().to_lowercase();
            let b_name = b.display_name().to_lowercase();
            a_name
                .cmp(&b_name)
                .then_with(|| a.display_name().cmp(b.display_name()))
        });

        self.entries.clear();
        self.pending.clear();
        self.grid.clear();

        for record in records {
            self.upsert(record);
        }
    }

    /// Applies one incremental change. A delete for an unknown key is a no-op.
    pub fn apply_delta(&mut self, delta: Delta) {
        let key = delta.record.key();
        trace!(%key, kind = ?delta.kind, "applying delta");

        match delta.kind {
            DeltaKind::Added | DeltaKind::Modified => self.upsert(delta.record),
            DeltaKind::Deleted => {
                self.entries.remove(&key);
                self.pending.remove(&key);
                self.grid.remove(&key);
            }
        }
    }

    /// Diffs a fresh full listing against the map and applies the changes in
    /// place. Used by the polling transport, where clearing and redrawing on
    /// every fetch would lose pending button states.
    pub fn reconcile(&mut self, records: Vec<AppRecord>) {
        let mut seen = Vec::with_capacity(records.len());

        for record in records {
            let key = record.key();
            seen.push(key.clone());

            match self.entries.get(&key) {
                Some(entry) if entry.record == record => {}
                _ => self.upsert(record),
            }
        }

        let gone: Vec<AppKey> = self
            .entries
            .keys()
            .filter(|key| !seen.contains(key))
            .cloned()
            .collect();
        for key in gone {
            self.entries.remove(&key);
            self.pending.remove(&key);
            self.grid.remove(&key);
        }
    }

    /// Marks a scale request as in flight and redraws the card with a
    /// disabled `Starting...`/`Stopping...` button.
    pub fn begin_action(&mut self, key: &AppKey, turn_on: bool) {
        let action = if turn_on {
            PendingAction::Starting
        } else {
            PendingAction::Stopping
        };
        self.pending.insert(key.clone(), action);
        self.redraw(key);
    }

    /// Clears the in-flight marker and restores the regular button
    pub fn finish_action(&mut self, key: &AppKey) {
        self.pending.remove(key);
        self.redraw(key);
    }

    pub fn action_in_flight(&self, key: &AppKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Renders the card as if the scale request already succeeded. The
    /// returned guard reverts it, unless an authoritative update for the key
    /// arrives first.
    pub fn apply_optimistic(&mut self, key: &AppKey, scale: u32) -> Option<OptimisticGuard> {
        let entry = self.entries.get_mut(key)?;
        let guard = OptimisticGuard {
            key: key.clone(),
            prior: entry.record.clone(),
            version: entry.version,
        };

        entry.record.replicas_current = scale;
        self.redraw(key);
        Some(guard)
    }

    /// Reverts an optimistic update. A no-op if the entry is gone or the
    /// server has pushed an authoritative record since the guess was made.
    pub fn rollback(&mut self, guard: OptimisticGuard) {
        let Some(entry) = self.entries.get_mut(&guard.key) else {
            return;
        };
        if entry.version != guard.version {
            trace!(key = %guard.key, "rollback superseded by authoritative update");
            return;
        }

        entry.record = guard.prior;
        self.redraw(&guard.key);
    }

    fn upsert(&mut self, record: AppRecord) {
        let key = record.key();
        let pending = self.pending.get(&key).copied();
        let html = render_card(&record, pending);

        self.next_version += 1;
        let version = self.next_version;
        self.entries
            .entry(key.clone())
            .and_modify(|entry| {
                entry.record = record.clone();
                entry.version = version;
            })
            .or_insert(Entry { record, version });

        self.grid.upsert(key, html);
    }

    fn redraw(&mut self, key: &AppKey) {
        if let Some(entry) = self.entries.get(key) {
            let html = render_card(&entry.record, self.pending.get(key).copied());
            self.grid.upsert(key.clone(), html);
        }
    }
}
