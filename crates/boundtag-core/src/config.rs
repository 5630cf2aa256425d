//! Allocator configuration.
//!
//! Three environment variables are consulted when an allocator resolves its
//! configuration:
//! - `MALLOCVERBOSE`: heap statistics are printed at process exit unless this
//!   is `NO` (also accepted: `0`, `off`, `false`, `disabled`).
//! - `BOUNDTAG_ARENA_SIZE`: payload capacity of each arena, decimal or `0x` hex.
//!   Rounded up to a multiple of 8 and clamped to [`MIN_ARENA_SIZE`].
//! - `BOUNDTAG_LOG`: minimum lifecycle record level
//!   (`trace|debug|info|warn|error|off`).
//!
//! Values that fail to parse fall back to the defaults.

use serde::Serialize;

use crate::malloc::log::AllocatorLogLevel;

pub const VERBOSE_ENV: &str = "MALLOCVERBOSE";
pub const ARENA_SIZE_ENV: &str = "BOUNDTAG_ARENA_SIZE";
pub const LOG_ENV: &str = "BOUNDTAG_LOG";

/// Default arena payload capacity (2 MiB).
pub const DEFAULT_ARENA_SIZE: usize = 2 * 1024 * 1024;

/// Smallest arena payload capacity accepted from configuration.
pub const MIN_ARENA_SIZE: usize = 4096;

/// Resolved allocator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocatorConfig {
    /// Payload capacity of one regular arena, in bytes.
    pub arena_size: usize,
    /// Print heap statistics at process exit.
    pub verbose: bool,
    /// Minimum lifecycle record level; `None` disables recording.
    pub log_level: Option<AllocatorLogLevel>,
}

impl AllocatorConfig {
    pub const DEFAULT: Self = Self {
        arena_size: DEFAULT_ARENA_SIZE,
        verbose: true,
        log_level: Some(AllocatorLogLevel::Info),
    };

    /// Returns a copy with the arena capacity set (normalized).
    #[must_use]
    pub const fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = normalize_arena_size(arena_size);
        self
    }

    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub const fn with_log_level(mut self, log_level: Option<AllocatorLogLevel>) -> Self {
        self.log_level = log_level;
        self
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// The C ABI passes a `getenv`-backed lookup here because it must not
    /// allocate while the heap is being initialized.
    pub fn from_lookup<F, V>(mut lookup: F) -> Self
    where
        F: FnMut(&'static str) -> Option<V>,
        V: AsRef<str>,
    {
        let mut config = Self::DEFAULT;
        if let Some(raw) = lookup(VERBOSE_ENV) {
            config.verbose = parse_verbose(raw.as_ref());
        }
        if let Some(size) = lookup(ARENA_SIZE_ENV).and_then(|raw| parse_size(raw.as_ref())) {
            config = config.with_arena_size(size);
        }
        if let Some(raw) = lookup(LOG_ENV) {
            config.log_level = parse_log_level(raw.as_ref());
        }
        config
    }

    /// Builds a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Where an allocator gets its configuration from on first use.
#[derive(Debug, Clone, Copy)]
pub enum ConfigSource {
    Fixed(AllocatorConfig),
    Deferred(fn() -> AllocatorConfig),
}

impl ConfigSource {
    #[must_use]
    pub fn resolve(self) -> AllocatorConfig {
        match self {
            Self::Fixed(config) => config,
            Self::Deferred(resolve) => resolve(),
        }
    }
}

const fn normalize_arena_size(size: usize) -> usize {
    let size = if size < MIN_ARENA_SIZE {
        MIN_ARENA_SIZE
    } else {
        size
    };
    // Saturate instead of wrapping on absurd values.
    match size.checked_add(7) {
        Some(v) => v & !7,
        None => usize::MAX & !7,
    }
}

// Parsers below run while the heap is being initialized and must not allocate.

fn parse_verbose(raw: &str) -> bool {
    let raw = raw.trim();
    !["no", "0", "off", "false", "disabled"]
        .iter()
        .any(|off| raw.eq_ignore_ascii_case(off))
}

fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let (digits, radix) = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (raw, 10),
    };
    let mut value: usize = 0;
    let mut seen_digit = false;
    for c in digits.chars().filter(|c| *c != '_') {
        let digit = c.to_digit(radix)? as usize;
        value = value.checked_mul(radix as usize)?.checked_add(digit)?;
        seen_digit = true;
    }
    seen_digit.then_some(value)
}

fn parse_log_level(raw: &str) -> Option<AllocatorLogLevel> {
    let raw = raw.trim();
    if ["off", "none", "disabled"]
        .iter()
        .any(|off| raw.eq_ignore_ascii_case(off))
    {
        return None;
    }
    Some(AllocatorLogLevel::from_str_loose(raw))
}
