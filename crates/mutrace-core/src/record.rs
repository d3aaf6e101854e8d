use facet::Facet;
use std::fmt;

/// Address of an instrumented mutex. Only ever compared, hashed and printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexId(usize);

impl MutexId {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub fn address(self) -> usize {
        self.0
    }
}

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// OS thread identity of a lock owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum Lifecycle {
    Alive,
    Retired,
}

/// Bookkeeping for one mutex identity. Only touched under its shard lock.
#[derive(Debug)]
pub struct MutexRecord {
    pub(crate) identity: MutexId,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) lock_level: i64,
    pub(crate) is_broken: bool,
    pub(crate) last_owner: Option<OwnerId>,
    pub(crate) locked_count: u64,
    pub(crate) owner_changed_count: u64,
    pub(crate) contended_count: u64,
    pub(crate) held_time_total: u64,
    pub(crate) held_time_max: u64,
    pub(crate) acquired_at: Option<u64>,
    pub(crate) first_use_trace: Box<str>,
    pub(crate) report_id: Option<u32>,
}

impl MutexRecord {
    pub(crate) fn new(identity: MutexId, first_use_trace: String) -> Self {
        Self {
            identity,
            lifecycle: Lifecycle::Alive,
            lock_level: 0,
            is_broken: false,
            last_owner: None,
            locked_count: 0,
            owner_changed_count: 0,
            contended_count: 0,
            held_time_total: 0,
            held_time_max: 0,
            acquired_at: None,
            first_use_trace: first_use_trace.into_boxed_str(),
            report_id: None,
        }
    }

    pub fn identity(&self) -> MutexId {
        self.identity
    }

    pub fn lock_level(&self) -> i64 {
        self.lock_level
    }

    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    pub fn first_use_trace(&self) -> &str {
        &self.first_use_trace
    }

    pub fn stats(&self) -> MutexStats {
        MutexStats {
            report_id: self.report_id,
            address: self.identity.address() as u64,
            lifecycle: self.lifecycle,
            lock_level: self.lock_level,
            is_broken: self.is_broken,
            last_owner: self.last_owner.map(OwnerId::get),
            locked_count: self.locked_count,
            owner_changed_count: self.owner_changed_count,
            contended_count: self.contended_count,
            held_time_total_ns: self.held_time_total,
            held_time_max_ns: self.held_time_max,
            first_use_trace: self.first_use_trace.to_string(),
        }
    }
}

/// Detached copy of a [`MutexRecord`], safe to hold after the shard unlocks.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct MutexStats {
    pub report_id: Option<u32>,
    pub address: u64,
    pub lifecycle: Lifecycle,
    pub lock_level: i64,
    pub is_broken: bool,
    pub last_owner: Option<u64>,
    pub locked_count: u64,
    pub owner_changed_count: u64,
    pub contended_count: u64,
    pub held_time_total_ns: u64,
    pub held_time_max_ns: u64,
    pub first_use_trace: String,
}
