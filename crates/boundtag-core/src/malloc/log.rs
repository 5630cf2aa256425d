//! Structured allocator lifecycle records.
//!
//! Records are kept in a fixed-capacity ring inside the heap state so that
//! recording never allocates: the allocator may be the process allocator.
//! Older records are overwritten once the ring is full.

use serde::{Deserialize, Serialize};

/// Number of lifecycle records retained.
pub const LOG_CAPACITY: usize = 256;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        const NAMES: [(&str, AllocatorLogLevel); 6] = [
            ("trace", AllocatorLogLevel::Trace),
            ("debug", AllocatorLogLevel::Debug),
            ("info", AllocatorLogLevel::Info),
            ("warn", AllocatorLogLevel::Warn),
            ("warning", AllocatorLogLevel::Warn),
            ("error", AllocatorLogLevel::Error),
        ];
        NAMES
            .iter()
            .find(|(name, _)| s.eq_ignore_ascii_case(name))
            .map_or(Self::Info, |(_, level)| *level)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `free`, `calloc`, `realloc`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `arena_grow`, ...).
    pub event: &'static str,
    /// Heap offset of the block header involved in the event.
    pub offset: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Path taken through the engine (`split`, `merge_left`, ...).
    pub path: &'static str,
    /// Snapshot: arenas obtained so far.
    pub arena_count: usize,
    /// Snapshot: cumulative heap size in bytes.
    pub heap_size: usize,
    /// Snapshot: free-list length.
    pub free_blocks: usize,
}

/// Fixed-capacity ring of lifecycle records.
pub struct LifecycleLog {
    records: [Option<AllocatorLogRecord>; LOG_CAPACITY],
    /// Index the next record is written to.
    head: usize,
    len: usize,
    next_decision_id: u64,
    min_level: Option<AllocatorLogLevel>,
}

impl LifecycleLog {
    pub const fn new(min_level: Option<AllocatorLogLevel>) -> Self {
        Self {
            records: [None; LOG_CAPACITY],
            head: 0,
            len: 0,
            next_decision_id: 1,
            min_level,
        }
    }

    pub fn set_min_level(&mut self, min_level: Option<AllocatorLogLevel>) {
        self.min_level = min_level;
    }

    #[must_use]
    pub fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.min_level.is_some_and(|min| level >= min)
    }

    /// Assigns a decision id and stores the record. Returns `false` when the
    /// level is filtered out.
    pub fn push(&mut self, mut record: AllocatorLogRecord) -> bool {
        if !self.enabled(record.level) {
            return false;
        }
        record.decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        self.records[self.head] = Some(record);
        self.head = (self.head + 1) % LOG_CAPACITY;
        self.len = (self.len + 1).min(LOG_CAPACITY);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records in chronological order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AllocatorLogRecord> + '_ {
        let start = (self.head + LOG_CAPACITY - self.len) % LOG_CAPACITY;
        (0..self.len).filter_map(move |i| self.records[(start + i) % LOG_CAPACITY].as_ref())
    }

    /// Removes and returns all retained records, oldest first.
    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        let out: Vec<AllocatorLogRecord> = self.iter().copied().collect();
        self.records = [None; LOG_CAPACITY];
        self.head = 0;
        self.len = 0;
        out
    }
}
