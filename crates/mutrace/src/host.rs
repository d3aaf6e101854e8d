use mutrace_core::{Host, OwnerId, StackFrame};
use mutrace_trace_capture::{CaptureOptions, CapturedFrame, capture_current, module_of};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::time::Instant;

/// Clock, thread identity and stacks of the process we are loaded into.
pub struct SystemHost {
    started: Instant,
    /// Path of the object this code was loaded from.
    own_module: Option<String>,
}

impl SystemHost {
    pub fn new() -> Self {
        let anchor = SystemHost::new as fn() -> Self;
        Self {
            started: Instant::now(),
            own_module: module_of(anchor as *const c_void).map(|module| module.path),
        }
    }

    fn is_own(&self, frame: &CapturedFrame) -> bool {
        self.own_module
            .as_deref()
            .is_some_and(|path| frame.belongs_to(path))
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SystemHost {
    fn now_ns(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }

    fn current_owner(&self) -> OwnerId {
        OwnerId::new(current_thread_id())
    }

    fn capture_stack(&self, max_frames: NonZeroUsize) -> Vec<StackFrame> {
        let options = CaptureOptions {
            max_frames,
            skip_frames: 0,
        };
        match capture_current(options) {
            Ok(frames) => frames
                .iter()
                .map(|frame| StackFrame::new(frame.to_string(), self.is_own(frame)))
                .collect(),
            Err(err) => {
                crate::log::scoped(|| tracing::debug!(%err, "no first-use trace"));
                Vec::new()
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn current_thread_id() -> u64 {
    (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
}

#[cfg(not(target_os = "linux"))]
fn current_thread_id() -> u64 {
    (unsafe { libc::pthread_self() }) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let host = SystemHost::new();
        let a = host.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = host.now_ns();
        assert!(b >= a + 1_000_000);
    }

    #[test]
    fn owner_differs_between_threads() {
        let host = SystemHost::new();
        let here = host.current_owner();
        assert_eq!(here, host.current_owner());
        let there = std::thread::scope(|s| s.spawn(|| host.current_owner()).join().unwrap());
        assert_ne!(here, there);
    }

    #[test]
    fn own_frames_are_marked() {
        let host = SystemHost::new();
        assert!(host.own_module.is_some());
        let frames = host.capture_stack(NonZeroUsize::new(32).unwrap());
        assert!(!frames.is_empty());
        assert!(frames.iter().any(|frame| frame.own));
        assert!(frames.iter().all(|frame| !frame.text.is_empty()));
    }
}
