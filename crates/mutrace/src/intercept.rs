//! Replacements for the libc symbols the dynamic linker resolves to us first.
//!
//! Every replacement keeps the return-code contract of the function it
//! replaces. Until the profiler exists, and whenever the calling thread is
//! already inside profiler bookkeeping, calls go straight through.

use libc::{c_int, pthread_mutex_t, pthread_mutexattr_t, timespec};
use mutrace_core::MutexId;

use crate::real;

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_init(
    mutex: *mut pthread_mutex_t,
    attr: *const pthread_mutexattr_t,
) -> c_int {
    let real = real::symbols();
    let Some(profiler) = crate::profiler() else {
        return unsafe { (real.init)(mutex, attr) };
    };
    profiler.init(MutexId::from_ptr(mutex), || unsafe {
        (real.init)(mutex, attr)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_destroy(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::symbols();
    let Some(profiler) = crate::profiler() else {
        return unsafe { (real.destroy)(mutex) };
    };
    profiler.destroy(MutexId::from_ptr(mutex), || unsafe {
        (real.destroy)(mutex)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_lock(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::symbols();
    let Some(profiler) = crate::profiler() else {
        return unsafe { (real.lock)(mutex) };
    };
    profiler.lock(
        MutexId::from_ptr(mutex),
        || unsafe { (real.trylock)(mutex) },
        || unsafe { (real.lock)(mutex) },
    )
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_trylock(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::symbols();
    let Some(profiler) = crate::profiler() else {
        return unsafe { (real.trylock)(mutex) };
    };
    profiler.try_lock(MutexId::from_ptr(mutex), || unsafe {
        (real.trylock)(mutex)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_timedlock(
    mutex: *mut pthread_mutex_t,
    deadline: *const timespec,
) -> c_int {
    let real = real::symbols();
    let Some(profiler) = crate::profiler() else {
        return unsafe { (real.timedlock)(mutex, deadline) };
    };
    profiler.timed_lock(
        MutexId::from_ptr(mutex),
        || unsafe { (real.trylock)(mutex) },
        || unsafe { (real.timedlock)(mutex, deadline) },
    )
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_unlock(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::symbols();
    let Some(profiler) = crate::profiler() else {
        return unsafe { (real.unlock)(mutex) };
    };
    profiler.unlock(MutexId::from_ptr(mutex), || unsafe {
        (real.unlock)(mutex)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn exit(status: c_int) -> ! {
    crate::report();
    unsafe { (real::symbols().exit)(status) }
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _Exit(status: c_int) -> ! {
    crate::report();
    unsafe { (real::symbols().exit_immediately)(status) }
}
