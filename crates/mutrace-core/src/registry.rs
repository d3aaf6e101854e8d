use parking_lot::MutexGuard;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::record::{MutexId, MutexRecord, MutexStats};
use crate::shard::{ShardLists, ShardTable};
use crate::stats::Counters;

/// Concurrent map from mutex identity to its record, sharded by address.
pub struct Registry {
    table: ShardTable,
    counters: Counters,
    sealed: AtomicBool,
}

impl Registry {
    pub fn new(hash_size: usize) -> Self {
        Self {
            table: ShardTable::new(hash_size),
            counters: Counters::default(),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn hash_size(&self) -> usize {
        self.table.len()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    fn lock_index(&self, index: usize) -> MutexGuard<'_, ShardLists> {
        let shard = self.table.shard(index);
        match shard.try_lock() {
            Some(lists) => lists,
            None => {
                self.counters.note_self_contention();
                shard.lock()
            }
        }
    }

    /// Lock the shard owning `identity`. `None` once the report has sealed
    /// the registry.
    pub fn lock_shard(&self, identity: MutexId) -> Option<ShardGuard<'_>> {
        let lists = self.lock_index(self.table.index_of(identity));
        if self.is_sealed() {
            return None;
        }
        Some(ShardGuard {
            lists,
            counters: &self.counters,
        })
    }

    /// Find or create the live record for `identity`, returning it with its
    /// shard still locked. `first_use_trace` only runs on creation.
    pub fn acquire(
        &self,
        identity: MutexId,
        first_use_trace: impl FnOnce() -> String,
    ) -> Option<RecordGuard<'_>> {
        let shard = self.lock_shard(identity)?;
        Some(shard.into_record(identity, first_use_trace))
    }

    /// Move the live record for `identity`, if any, to the retired list.
    pub fn retire(&self, identity: MutexId) {
        if let Some(mut shard) = self.lock_shard(identity) {
            shard.retire(identity);
        }
    }

    /// Treat an explicit init as retire-then-recreate, so a new mutex at a
    /// reused address starts from a fresh record.
    pub fn reinit(&self, identity: MutexId, first_use_trace: impl FnOnce() -> String) {
        if let Some(mut shard) = self.lock_shard(identity) {
            shard.retire(identity);
            shard.insert(identity, first_use_trace());
        }
    }

    /// Snapshot of the live record for `identity`.
    pub fn stats(&self, identity: MutexId) -> Option<MutexStats> {
        let lists = self.lock_index(self.table.index_of(identity));
        let slot = lists.position(identity)?;
        Some(lists.alive(slot).stats())
    }

    /// Snapshots of retired records for `identity`, newest first.
    pub fn retired_stats(&self, identity: MutexId) -> Vec<MutexStats> {
        let lists = self.lock_index(self.table.index_of(identity));
        lists
            .retired()
            .filter(|r| r.identity() == identity)
            .map(MutexRecord::stats)
            .collect()
    }

    /// Lock every shard in ascending index order.
    pub fn lock_all(&self) -> LockedRegistry<'_> {
        let shards = (0..self.table.len()).map(|i| self.lock_index(i)).collect();
        LockedRegistry {
            shards,
            sealed: &self.sealed,
        }
    }
}

/// One locked shard.
pub struct ShardGuard<'a> {
    lists: MutexGuard<'a, ShardLists>,
    counters: &'a Counters,
}

impl<'a> ShardGuard<'a> {
    pub fn retire(&mut self, identity: MutexId) -> bool {
        self.lists.retire(identity)
    }

    pub fn insert(&mut self, identity: MutexId, first_use_trace: String) -> usize {
        let (slot, collided) = self
            .lists
            .insert(MutexRecord::new(identity, first_use_trace));
        if collided {
            self.counters.note_collision();
        }
        slot
    }

    pub fn into_record(
        mut self,
        identity: MutexId,
        first_use_trace: impl FnOnce() -> String,
    ) -> RecordGuard<'a> {
        let slot = match self.lists.position(identity) {
            Some(slot) => slot,
            None => self.insert(identity, first_use_trace()),
        };
        RecordGuard { shard: self, slot }
    }
}

/// A live record with its shard lock held. Dropping it releases the shard.
pub struct RecordGuard<'a> {
    shard: ShardGuard<'a>,
    slot: usize,
}

impl RecordGuard<'_> {
    /// Split into the record and the counters it reports misuse to.
    pub(crate) fn parts(&mut self) -> (&mut MutexRecord, &Counters) {
        let counters = self.shard.counters;
        (self.shard.lists.alive_mut(self.slot), counters)
    }
}

impl Deref for RecordGuard<'_> {
    type Target = MutexRecord;

    fn deref(&self) -> &MutexRecord {
        self.shard.lists.alive(self.slot)
    }
}

impl DerefMut for RecordGuard<'_> {
    fn deref_mut(&mut self) -> &mut MutexRecord {
        self.shard.lists.alive_mut(self.slot)
    }
}

/// Every shard locked at once. Shards unlock in ascending order on drop.
pub struct LockedRegistry<'a> {
    shards: Vec<MutexGuard<'a, ShardLists>>,
    sealed: &'a AtomicBool,
}

impl LockedRegistry<'_> {
    pub fn len(&self) -> usize {
        self.shards.iter().map(|lists| lists.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> impl Iterator<Item = &MutexRecord> {
        self.shards.iter().flat_map(|lists| lists.records())
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut MutexRecord> {
        self.shards.iter_mut().flat_map(|lists| lists.records_mut())
    }

    /// Refuse all further mutation. Waiters that already queued on a shard
    /// see the flag once they get the lock.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }
}
