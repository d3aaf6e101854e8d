//! Call-stack capture for first-use traces.
//!
//! Frames are collected with the platform unwinder (so target programs built
//! without frame pointers still produce usable stacks) and symbolized with
//! `dladdr`, which is cheap enough to run while a registry shard is locked.
//! Each frame renders in the familiar `backtrace_symbols` layout:
//!
//! ```text
//! /usr/lib/libfoo.so(foo_worker+0x2a) [0x7f3a1c2d402a]
//! ```

use std::error::Error;
use std::ffi::{CStr, c_void};
use std::fmt;
use std::num::NonZeroUsize;

const DEFAULT_MAX_FRAMES: NonZeroUsize = NonZeroUsize::new(16).unwrap();

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    pub max_frames: NonZeroUsize,
    pub skip_frames: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            skip_frames: 0,
        }
    }
}

/// The loaded object an instruction pointer falls into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub path: String,
    pub runtime_base: u64,
}

/// The nearest exported symbol at or below an instruction pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub addr: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub ip: u64,
    pub module: Option<ModuleInfo>,
    pub symbol: Option<SymbolInfo>,
}

impl CapturedFrame {
    /// Whether this frame executes code from the object at `module_path`.
    pub fn belongs_to(&self, module_path: &str) -> bool {
        self.module
            .as_ref()
            .is_some_and(|module| module.path == module_path)
    }
}

impl fmt::Display for CapturedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(module) = &self.module else {
            return write!(f, "[0x{:x}]", self.ip);
        };
        match &self.symbol {
            Some(symbol) => write!(
                f,
                "{}({}+0x{:x}) [0x{:x}]",
                module.path,
                symbol.name,
                self.ip.wrapping_sub(symbol.addr),
                self.ip
            ),
            None => write!(
                f,
                "{}(+0x{:x}) [0x{:x}]",
                module.path,
                self.ip.wrapping_sub(module.runtime_base),
                self.ip
            ),
        }
    }
}

#[derive(Debug)]
pub enum CaptureError {
    UnsupportedPlatform { target_os: &'static str },
    EmptyBacktrace,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPlatform { target_os } => {
                write!(
                    f,
                    "unsupported platform for trace capture backend: {target_os}; only Unix targets are implemented"
                )
            }
            Self::EmptyBacktrace => write!(f, "unwinder produced no frames"),
        }
    }
}

impl Error for CaptureError {}

/// Capture and symbolize the current thread's stack, innermost frame first.
pub fn capture_current(options: CaptureOptions) -> Result<Vec<CapturedFrame>, CaptureError> {
    platform::capture_current_impl(options)
}

/// Resolve the loaded object containing `addr`.
pub fn module_of(addr: *const c_void) -> Option<ModuleInfo> {
    platform::module_of_impl(addr)
}

#[cfg(unix)]
mod platform {
    use super::*;

    pub fn capture_current_impl(
        options: CaptureOptions,
    ) -> Result<Vec<CapturedFrame>, CaptureError> {
        let raw_ips = collect_raw_ips(options);
        if raw_ips.is_empty() {
            return Err(CaptureError::EmptyBacktrace);
        }

        Ok(raw_ips.into_iter().map(symbolize).collect())
    }

    fn collect_raw_ips(options: CaptureOptions) -> Vec<u64> {
        let mut raw_ips = Vec::with_capacity(options.max_frames.get());
        let mut skip_remaining = options.skip_frames;

        backtrace::trace(|frame| {
            let ip = frame.ip() as usize as u64;
            if ip == 0 {
                return true;
            }
            if skip_remaining > 0 {
                skip_remaining -= 1;
                return true;
            }
            raw_ips.push(ip);
            raw_ips.len() < options.max_frames.get()
        });

        raw_ips
    }

    fn symbolize(ip: u64) -> CapturedFrame {
        let Some(info) = dladdr(ip as usize as *const c_void) else {
            return CapturedFrame {
                ip,
                module: None,
                symbol: None,
            };
        };

        let module = module_from(&info);
        let symbol = if info.dli_sname.is_null() || info.dli_saddr.is_null() {
            None
        } else {
            let name = unsafe { CStr::from_ptr(info.dli_sname) }
                .to_string_lossy()
                .into_owned();
            Some(SymbolInfo {
                name,
                addr: info.dli_saddr as usize as u64,
            })
        };

        CapturedFrame { ip, module, symbol }
    }

    pub fn module_of_impl(addr: *const c_void) -> Option<ModuleInfo> {
        dladdr(addr).as_ref().and_then(module_from)
    }

    fn dladdr(addr: *const c_void) -> Option<libc::Dl_info> {
        let mut info = std::mem::MaybeUninit::<libc::Dl_info>::zeroed();
        let ok = unsafe { libc::dladdr(addr, info.as_mut_ptr()) };
        if ok == 0 {
            return None;
        }
        Some(unsafe { info.assume_init() })
    }

    fn module_from(info: &libc::Dl_info) -> Option<ModuleInfo> {
        if info.dli_fname.is_null() || info.dli_fbase.is_null() {
            return None;
        }
        let path = unsafe { CStr::from_ptr(info.dli_fname) }
            .to_string_lossy()
            .into_owned();
        if path.is_empty() {
            return None;
        }
        Some(ModuleInfo {
            path,
            runtime_base: info.dli_fbase as usize as u64,
        })
    }
}

#[cfg(not(unix))]
mod platform {
    use super::*;

    pub fn capture_current_impl(
        _options: CaptureOptions,
    ) -> Result<Vec<CapturedFrame>, CaptureError> {
        Err(CaptureError::UnsupportedPlatform {
            target_os: std::env::consts::OS,
        })
    }

    pub fn module_of_impl(_addr: *const c_void) -> Option<ModuleInfo> {
        None
    }
}
