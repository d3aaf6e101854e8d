//! Fixed table of independently locked buckets holding mutex records.
//!
//! Shard locks are `parking_lot` mutexes: they park on futexes directly and
//! never route through `pthread_mutex_*`, so the profiler cannot observe its
//! own bookkeeping locks.

use parking_lot::Mutex;

use crate::record::{Lifecycle, MutexId, MutexRecord};

/// Fold a mutex address into `[0, hash_size)`.
///
/// Not a real hash: repeatedly xors the quotient and remainder of the address
/// by `hash_size` until the value fits. Collisions only lengthen a bucket scan.
pub fn shard_index(identity: MutexId, hash_size: usize) -> usize {
    if hash_size <= 1 {
        return 0;
    }
    let mut u = identity.address();
    while u >= hash_size {
        u = (u % hash_size) ^ (u / hash_size);
    }
    u
}

/// Records of one bucket. Both lists keep the newest record at the head.
#[derive(Debug, Default)]
pub struct ShardLists {
    // Stored oldest first; the head is the last element.
    alive: Vec<MutexRecord>,
    retired: Vec<MutexRecord>,
}

impl ShardLists {
    pub(crate) fn position(&self, identity: MutexId) -> Option<usize> {
        self.alive.iter().rposition(|r| r.identity == identity)
    }

    /// Link `record` at the head of the alive list. Returns its slot and
    /// whether the bucket already held other live records.
    pub(crate) fn insert(&mut self, record: MutexRecord) -> (usize, bool) {
        let collided = !self.alive.is_empty();
        self.alive.push(record);
        (self.alive.len() - 1, collided)
    }

    /// Move the live record for `identity` to the head of the retired list.
    pub(crate) fn retire(&mut self, identity: MutexId) -> bool {
        let Some(pos) = self.position(identity) else {
            return false;
        };
        let mut record = self.alive.remove(pos);
        record.lifecycle = Lifecycle::Retired;
        self.retired.push(record);
        true
    }

    pub(crate) fn alive_mut(&mut self, slot: usize) -> &mut MutexRecord {
        &mut self.alive[slot]
    }

    pub(crate) fn alive(&self, slot: usize) -> &MutexRecord {
        &self.alive[slot]
    }

    /// Alive records head to tail, then retired records head to tail.
    pub fn records(&self) -> impl Iterator<Item = &MutexRecord> {
        self.alive.iter().rev().chain(self.retired.iter().rev())
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut MutexRecord> {
        self.alive
            .iter_mut()
            .rev()
            .chain(self.retired.iter_mut().rev())
    }

    pub fn retired(&self) -> impl Iterator<Item = &MutexRecord> {
        self.retired.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.alive.len() + self.retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct ShardTable {
    shards: Box<[Mutex<ShardLists>]>,
}

impl ShardTable {
    pub(crate) fn new(hash_size: usize) -> Self {
        let shards = (0..hash_size.max(1))
            .map(|_| Mutex::new(ShardLists::default()))
            .collect();
        Self { shards }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shard(&self, index: usize) -> &Mutex<ShardLists> {
        &self.shards[index]
    }

    pub(crate) fn index_of(&self, identity: MutexId) -> usize {
        shard_index(identity, self.shards.len())
    }
}
