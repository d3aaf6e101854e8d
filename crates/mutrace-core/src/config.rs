//! Tunables, read once from the environment when the profiler starts.

use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub const HASH_SIZE_VAR: &str = "MUTRACE_HASH_SIZE";
pub const FRAMES_VAR: &str = "MUTRACE_FRAMES";
pub const LOCKED_MIN_VAR: &str = "MUTRACE_LOCKED_MIN";
pub const OWNER_CHANGED_MIN_VAR: &str = "MUTRACE_OWNER_CHANGED_MIN";
pub const CONTENDED_MIN_VAR: &str = "MUTRACE_CONTENDED_MIN";
pub const JSON_VAR: &str = "MUTRACE_JSON";

pub const DEFAULT_HASH_SIZE: NonZeroUsize = NonZeroUsize::new(557).unwrap();
pub const DEFAULT_FRAMES_MAX: NonZeroUsize = NonZeroUsize::new(16).unwrap();

/// Minimums a record must reach to be listed in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowThresholds {
    pub locked_min: u64,
    pub owner_changed_min: u64,
    pub contended_min: u64,
}

impl Default for ShowThresholds {
    fn default() -> Self {
        Self {
            locked_min: 1,
            owner_changed_min: 2,
            contended_min: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub hash_size: NonZeroUsize,
    pub frames_max: NonZeroUsize,
    pub thresholds: ShowThresholds,
    pub json_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_size: DEFAULT_HASH_SIZE,
            frames_max: DEFAULT_FRAMES_MAX,
            thresholds: ShowThresholds::default(),
            json_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Malformed { var: &'static str, value: String },
    MustBePositive { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { var, value } => {
                write!(f, "failed to parse {var} ({value}); using the default")
            }
            Self::MustBePositive { var, value } => {
                write!(f, "{var} must be positive, got {value}; using the default")
            }
        }
    }
}

impl Error for ConfigError {}

impl Config {
    /// Build from the process environment. Rejected values fall back to
    /// their defaults and are returned alongside for the caller to log.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|key| {
            std::env::var_os(key).map(|value| value.to_string_lossy().into_owned())
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut errors = Vec::new();

        let mut positive = |var: &'static str, slot: &mut NonZeroUsize| {
            let Some(value) = lookup(var) else {
                return;
            };
            match parse_ulong(&value) {
                Some(n) => match usize::try_from(n).ok().and_then(NonZeroUsize::new) {
                    Some(n) => *slot = n,
                    None => errors.push(ConfigError::MustBePositive { var, value }),
                },
                None => errors.push(ConfigError::Malformed { var, value }),
            }
        };
        positive(HASH_SIZE_VAR, &mut config.hash_size);
        positive(FRAMES_VAR, &mut config.frames_max);

        let mut threshold = |var: &'static str, slot: &mut u64| {
            let Some(value) = lookup(var) else {
                return;
            };
            match parse_ulong(&value) {
                Some(n) => *slot = n,
                None => errors.push(ConfigError::Malformed { var, value }),
            }
        };
        threshold(LOCKED_MIN_VAR, &mut config.thresholds.locked_min);
        threshold(OWNER_CHANGED_MIN_VAR, &mut config.thresholds.owner_changed_min);
        threshold(CONTENDED_MIN_VAR, &mut config.thresholds.contended_min);

        config.json_path = lookup(JSON_VAR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        (config, errors)
    }
}

/// Parse an unsigned integer the way `strtoul(s, &end, 0)` does when the
/// whole string must be consumed: decimal, `0x` hexadecimal, or octal with a
/// leading `0`.
pub fn parse_ulong(text: &str) -> Option<u64> {
    let text = text.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);

    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}
