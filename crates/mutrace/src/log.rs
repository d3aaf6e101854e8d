//! Diagnostics for the profiler itself.
//!
//! The target program may install its own global subscriber, so ours is a
//! private dispatcher entered only for the duration of a profiler call.

use std::sync::OnceLock;
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

pub const LOG_VAR: &str = "MUTRACE_LOG";

static DISPATCH: OnceLock<Dispatch> = OnceLock::new();

fn dispatch() -> &'static Dispatch {
    DISPATCH.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .finish();
        Dispatch::new(subscriber)
    })
}

/// Run `f` with the profiler's subscriber as the current default.
pub(crate) fn scoped<T>(f: impl FnOnce() -> T) -> T {
    tracing::dispatcher::with_default(dispatch(), f)
}
