//! The profiler service and its contract-preserving entry points.
//!
//! Each entry point takes closures that call the real, uninstrumented
//! primitive. Whatever those return is what the caller gets back; bookkeeping
//! only ever observes the result.

use libc::{EBUSY, ETIMEDOUT, c_int};
use std::io::{self, Write};
use std::num::NonZeroUsize;

use crate::config::Config;
use crate::guard::ReentrancyGuard;
use crate::record::{MutexId, OwnerId};
use crate::registry::Registry;
use crate::report::{ReportDocument, Reporter};
use crate::stack::{StackFrame, render_first_use_trace};

/// Services the profiler consumes from the process it lives in.
pub trait Host: Send + Sync {
    /// Monotonic nanoseconds.
    fn now_ns(&self) -> u64;

    fn current_owner(&self) -> OwnerId;

    /// Raw frames of the calling thread, innermost first, at most `max_frames`.
    fn capture_stack(&self, max_frames: NonZeroUsize) -> Vec<StackFrame>;
}

pub struct Profiler<H> {
    config: Config,
    registry: Registry,
    reporter: Reporter,
    host: H,
}

impl<H: Host> Profiler<H> {
    pub fn new(config: Config, host: H) -> Self {
        let registry = Registry::new(config.hash_size.get());
        Self {
            config,
            registry,
            reporter: Reporter::new(),
            host,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn first_use_trace(&self) -> String {
        render_first_use_trace(&self.host.capture_stack(self.config.frames_max))
    }

    fn note_acquired(&self, identity: MutexId, contended: bool) {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return;
        };
        let Some(mut record) = self
            .registry
            .acquire(identity, || self.first_use_trace())
        else {
            return;
        };
        let owner = self.host.current_owner();
        let now = self.host.now_ns();
        let (record, counters) = record.parts();
        record.note_acquired(contended, owner, now, counters);
    }

    fn note_released(&self, identity: MutexId) {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return;
        };
        let Some(mut record) = self
            .registry
            .acquire(identity, || self.first_use_trace())
        else {
            return;
        };
        let now = self.host.now_ns();
        let (record, counters) = record.parts();
        record.note_released(now, counters);
    }

    fn note_timed_out(&self, identity: MutexId) {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return;
        };
        if let Some(mut record) = self
            .registry
            .acquire(identity, || self.first_use_trace())
        {
            record.note_timed_out();
        }
    }

    /// Blocking acquisition: probe with `try_lock`, fall back to `lock` only
    /// if the mutex was busy, and count that as contention.
    pub fn lock(
        &self,
        identity: MutexId,
        try_lock: impl FnOnce() -> c_int,
        lock: impl FnOnce() -> c_int,
    ) -> c_int {
        let r = try_lock();
        if r != 0 && r != EBUSY {
            return r;
        }

        let contended = r == EBUSY;
        if contended {
            let r = lock();
            if r != 0 {
                return r;
            }
        }

        self.note_acquired(identity, contended);
        0
    }

    /// Like [`Profiler::lock`], with a deadline. A timeout counts as
    /// contention and is returned to the caller unchanged.
    pub fn timed_lock(
        &self,
        identity: MutexId,
        try_lock: impl FnOnce() -> c_int,
        timed_lock: impl FnOnce() -> c_int,
    ) -> c_int {
        let r = try_lock();
        if r != 0 && r != EBUSY {
            return r;
        }
        if r == 0 {
            self.note_acquired(identity, false);
            return 0;
        }

        match timed_lock() {
            0 => {
                self.note_acquired(identity, true);
                0
            }
            ETIMEDOUT => {
                self.note_timed_out(identity);
                ETIMEDOUT
            }
            r => r,
        }
    }

    /// Single non-blocking attempt. Only a successful attempt is recorded.
    pub fn try_lock(&self, identity: MutexId, try_lock: impl FnOnce() -> c_int) -> c_int {
        let r = try_lock();
        if r == 0 {
            self.note_acquired(identity, false);
        }
        r
    }

    pub fn unlock(&self, identity: MutexId, unlock: impl FnOnce() -> c_int) -> c_int {
        self.note_released(identity);
        unlock()
    }

    /// Initialize, then start a fresh record in case the address held an
    /// unrelated mutex before.
    pub fn init(&self, identity: MutexId, init: impl FnOnce() -> c_int) -> c_int {
        let r = init();
        if r != 0 {
            return r;
        }
        if let Some(_guard) = ReentrancyGuard::enter() {
            self.registry.reinit(identity, || self.first_use_trace());
        }
        r
    }

    pub fn destroy(&self, identity: MutexId, destroy: impl FnOnce() -> c_int) -> c_int {
        if let Some(_guard) = ReentrancyGuard::enter() {
            self.registry.retire(identity);
        }
        destroy()
    }

    pub fn is_finished(&self) -> bool {
        self.reporter.is_done()
    }

    /// Write the report to `out` and, if configured, the JSON document to
    /// its file. Later calls do nothing.
    pub fn shutdown(&self, out: &mut dyn Write) -> io::Result<Option<ReportDocument>> {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return Ok(None);
        };
        let Some(document) =
            self.reporter
                .report_once(&self.registry, &self.config.thresholds, out)?
        else {
            return Ok(None);
        };

        if let Some(path) = &self.config.json_path {
            let written = document
                .to_json()
                .and_then(|json| {
                    std::fs::write(path, json)
                        .map_err(|e| format!("failed to write {}: {e}", path.display()))
                });
            if let Err(err) = written {
                tracing::warn!("{err}");
            }
        }

        Ok(Some(document))
    }
}
