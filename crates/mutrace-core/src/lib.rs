//! Contention bookkeeping for pthread mutexes.
//!
//! This crate holds everything that does not depend on being preloaded into a
//! process: the sharded registry of per-mutex records, the statistics update
//! rules, configuration, first-use trace rendering and the exit-time report.
//! The `mutrace` crate wires a [`Profiler`] to the real libc symbols.
//!
//! ## Shape
//!
//! - [`Registry`] maps a mutex address to its [`MutexRecord`] across a fixed
//!   number of shards, each behind its own `parking_lot` lock.
//! - [`Profiler`] is the entry point the interposed functions call. It forwards
//!   to the real primitive through closures, then records what happened.
//! - [`Reporter`] prints the summary table once and seals the registry.

mod config;
mod guard;
mod profiler;
mod record;
mod registry;
mod report;
mod shard;
mod stack;
mod stats;

pub use config::*;
pub use guard::ReentrancyGuard;
pub use profiler::{Host, Profiler};
pub use record::{Lifecycle, MutexId, MutexRecord, MutexStats, OwnerId};
pub use registry::{LockedRegistry, RecordGuard, Registry, ShardGuard};
pub use report::{ReportDocument, ReportEntry, Reporter, is_shown, report_order, write_report};
pub use shard::shard_index;
pub use stack::{StackFrame, render_first_use_trace};
pub use stats::{CounterSnapshot, Counters};
