//! Preloadable pthread mutex contention profiler.
//!
//! Build as `libmutrace.so` and run a program with it in `LD_PRELOAD` (or use
//! the `mutrace` launcher). Every `pthread_mutex_*` call the program makes
//! resolves to this library first; the calls are forwarded to libc unchanged
//! and the profiler records what happened. A summary is printed to stderr
//! when the process exits.
//!
//! Tunables are read from `MUTRACE_*` environment variables when the library
//! is loaded; see [`mutrace_core::Config`].

use ctor::{ctor, dtor};
use mutrace_core::{Config, Profiler, ReentrancyGuard};
use std::io::{self, BufWriter};
use std::sync::OnceLock;

mod host;
mod intercept;
mod log;
mod real;

pub use host::SystemHost;
pub use intercept::*;
pub use log::LOG_VAR;

static PROFILER: OnceLock<Profiler<SystemHost>> = OnceLock::new();

/// The process-wide profiler, created on first use.
///
/// `None` while the calling thread is inside profiler bookkeeping; nested
/// calls then go straight to libc.
pub fn profiler() -> Option<&'static Profiler<SystemHost>> {
    if let Some(profiler) = PROFILER.get() {
        return Some(profiler);
    }
    let _guard = ReentrancyGuard::enter()?;
    Some(PROFILER.get_or_init(start))
}

fn start() -> Profiler<SystemHost> {
    real::symbols();
    log::scoped(|| {
        let (config, errors) = Config::from_env();
        for err in &errors {
            tracing::warn!("{err}");
        }
        tracing::debug!(
            hash_size = config.hash_size.get(),
            frames_max = config.frames_max.get(),
            json = ?config.json_path,
            "configuration"
        );
        let profiler = Profiler::new(config, SystemHost::new());
        tracing::info!(
            "mutrace {} successfully initialized",
            env!("CARGO_PKG_VERSION")
        );
        profiler
    })
}

/// Print the summary, once per process, whichever exit path gets here first.
pub fn report() {
    let Some(profiler) = profiler() else {
        return;
    };
    if profiler.is_finished() {
        return;
    }
    log::scoped(|| {
        let mut out = BufWriter::new(io::stderr().lock());
        if let Err(err) = profiler.shutdown(&mut out) {
            tracing::warn!(%err, "failed to write report");
        }
    });
}

#[ctor]
fn load() {
    let _ = profiler();
}

#[dtor]
fn unload() {
    report();
}
