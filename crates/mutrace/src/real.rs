//! The real pthread and exit routines, found behind this library in the
//! symbol lookup order.

use libc::{c_int, c_void, pthread_mutex_t, pthread_mutexattr_t, timespec};
use std::ffi::CStr;
use std::io::Write;
use std::sync::OnceLock;

pub(crate) type InitFn =
    unsafe extern "C" fn(*mut pthread_mutex_t, *const pthread_mutexattr_t) -> c_int;
pub(crate) type MutexFn = unsafe extern "C" fn(*mut pthread_mutex_t) -> c_int;
pub(crate) type TimedLockFn = unsafe extern "C" fn(*mut pthread_mutex_t, *const timespec) -> c_int;
pub(crate) type ExitFn = unsafe extern "C" fn(c_int) -> !;

pub(crate) struct RealSymbols {
    pub(crate) init: InitFn,
    pub(crate) destroy: MutexFn,
    pub(crate) lock: MutexFn,
    pub(crate) trylock: MutexFn,
    pub(crate) timedlock: TimedLockFn,
    pub(crate) unlock: MutexFn,
    pub(crate) exit: ExitFn,
    pub(crate) exit_immediately: ExitFn,
}

static REAL: OnceLock<RealSymbols> = OnceLock::new();

/// Resolved on first use; a missing symbol aborts the process.
pub(crate) fn symbols() -> &'static RealSymbols {
    REAL.get_or_init(RealSymbols::resolve)
}

impl RealSymbols {
    fn resolve() -> Self {
        // SAFETY: each name is paired with the C signature libc declares for it.
        unsafe {
            Self {
                init: std::mem::transmute::<*mut c_void, InitFn>(next(c"pthread_mutex_init")),
                destroy: std::mem::transmute::<*mut c_void, MutexFn>(next(
                    c"pthread_mutex_destroy",
                )),
                lock: std::mem::transmute::<*mut c_void, MutexFn>(next(c"pthread_mutex_lock")),
                trylock: std::mem::transmute::<*mut c_void, MutexFn>(next(
                    c"pthread_mutex_trylock",
                )),
                timedlock: std::mem::transmute::<*mut c_void, TimedLockFn>(next(
                    c"pthread_mutex_timedlock",
                )),
                unlock: std::mem::transmute::<*mut c_void, MutexFn>(next(
                    c"pthread_mutex_unlock",
                )),
                exit: std::mem::transmute::<*mut c_void, ExitFn>(next(c"exit")),
                exit_immediately: std::mem::transmute::<*mut c_void, ExitFn>(next(c"_Exit")),
            }
        }
    }
}

fn next(name: &CStr) -> *mut c_void {
    let symbol = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if symbol.is_null() {
        let _ = writeln!(
            std::io::stderr(),
            "mutrace: failed to resolve {}",
            name.to_string_lossy()
        );
        std::process::abort();
    }
    symbol
}
