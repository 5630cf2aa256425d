//! Heap state and the allocation engine.
//!
//! `Heap` is the unlocked state behind an [`Allocator`](super::Allocator):
//! the memory source, arena directory, free list, counters, and lifecycle
//! records. Every method assumes the caller holds the allocator lock.
//!
//! Allocation is first fit over the free list in list order. A fitting block
//! is split when the leftover exceeds [`MIN_SPLIT_REMAINDER`]; the high part
//! stays on the list in the original's position. When nothing fits, one new
//! arena is appended and the list is scanned once more.

use std::ptr::NonNull;

use super::arena::{ARENA_OVERHEAD, ArenaDirectory, ArenaLayout};
use super::block::{
    BLOCK_OVERHEAD, BlockState, FOOTER_SIZE, HEADER_SIZE, MIN_SPLIT_REMAINDER, TagStore,
    rounded_block_size,
};
use super::diag::{
    self, BlockInfo, FreeBlockInfo, FreeListDisplay, HeapCheck, HeapStats, HeapSummary,
};
use super::free_list::FreeList;
use super::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
use super::source::{MemorySource, obtain_extent};
use crate::config::{AllocatorConfig, ConfigSource};
use crate::error::HeapError;

/// Public entry point a heap operation was reached from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSymbol {
    Malloc,
    Free,
    Calloc,
    Realloc,
}

impl ApiSymbol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Free => "free",
            Self::Calloc => "calloc",
            Self::Realloc => "realloc",
        }
    }
}

pub struct Heap<S: MemorySource> {
    source: S,
    config_source: ConfigSource,
    config: AllocatorConfig,
    pub(super) arenas: ArenaDirectory,
    pub(super) free_list: FreeList,
    stats: HeapStats,
    logs: LifecycleLog,
    initialized: bool,
    symbol: ApiSymbol,
}

impl<S: MemorySource> Heap<S> {
    pub const fn new(source: S, config_source: ConfigSource) -> Self {
        Self {
            source,
            config_source,
            config: AllocatorConfig::DEFAULT,
            arenas: ArenaDirectory::new(),
            free_list: FreeList::new(),
            stats: HeapStats::new(),
            logs: LifecycleLog::new(AllocatorConfig::DEFAULT.log_level),
            initialized: false,
            symbol: ApiSymbol::Malloc,
        }
    }

    /// Marks the start of a public call: bumps its counter and tags the
    /// lifecycle records that follow.
    pub(crate) fn enter(&mut self, symbol: ApiSymbol) {
        self.symbol = symbol;
        let counter = match symbol {
            ApiSymbol::Malloc => &mut self.stats.mallocs,
            ApiSymbol::Free => &mut self.stats.frees,
            ApiSymbol::Calloc => &mut self.stats.callocs,
            ApiSymbol::Realloc => &mut self.stats.reallocs,
        };
        *counter += 1;
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Configuration in effect. Before initialization this is the default.
    #[must_use]
    pub fn config(&self) -> AllocatorConfig {
        self.config
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolves configuration and builds the first arena on first use.
    pub(crate) fn ensure_initialized(&mut self) -> Result<(), HeapError> {
        if self.initialized {
            return Ok(());
        }
        self.config = self.config_source.resolve();
        self.logs.set_min_level(self.config.log_level);
        self.grow(0)?;
        self.initialized = true;
        self.record_lifecycle(
            AllocatorLogLevel::Info,
            "init",
            None,
            Some(self.config.arena_size),
            "success",
            "",
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Allocation engine
    // -----------------------------------------------------------------------

    /// Allocates a block with at least `requested` payload bytes and returns
    /// its header offset.
    pub(crate) fn allocate(&mut self, requested: usize) -> Result<usize, HeapError> {
        if let Err(err) = self.ensure_initialized() {
            self.record_failure(&err, Some(requested));
            return Err(err);
        }
        let Some(rounded) = rounded_block_size(requested) else {
            let err = HeapError::SizeOverflow {
                count: 1,
                size: requested,
            };
            self.record_failure(&err, Some(requested));
            return Err(err);
        };

        let block = match self.free_list.find_first_fit(&self.arenas, rounded) {
            Some(block) => block,
            None => {
                if let Err(err) = self.grow(rounded) {
                    self.record_failure(&err, Some(requested));
                    return Err(err);
                }
                match self.free_list.find_first_fit(&self.arenas, rounded) {
                    Some(block) => block,
                    None => {
                        let err = HeapError::OutOfMemory { requested };
                        self.record_failure(&err, Some(requested));
                        return Err(err);
                    }
                }
            }
        };
        Ok(self.place(block, rounded))
    }

    /// Marks `block` allocated for a request of `rounded` bytes, splitting
    /// off the high part when the leftover is large enough.
    fn place(&mut self, block: usize, rounded: usize) -> usize {
        let size = self.arenas.size(block);
        let path = if size - rounded > MIN_SPLIT_REMAINDER {
            let rest = block + rounded;
            self.arenas.write_tags(rest, size - rounded, BlockState::Free);
            self.free_list.replace(&mut self.arenas, block, rest);
            self.arenas.write_tags(block, rounded, BlockState::Allocated);
            "split"
        } else {
            self.free_list.remove(&mut self.arenas, block);
            self.arenas.set_state(block, BlockState::Allocated);
            "whole"
        };
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "alloc",
            Some(block),
            Some(self.arenas.size(block)),
            "success",
            path,
        );
        block
    }

    /// Appends one arena large enough for a `rounded`-byte block and puts
    /// its free block at the tail of the free list.
    fn grow(&mut self, rounded: usize) -> Result<ArenaLayout, HeapError> {
        let capacity = self
            .config
            .arena_size
            .max(rounded.saturating_sub(BLOCK_OVERHEAD));
        let oom = HeapError::OutOfMemory { requested: rounded };
        if self.arenas.is_full() {
            return Err(oom);
        }
        let len = capacity.checked_add(ARENA_OVERHEAD).ok_or(oom)?;
        let extent = obtain_extent(&mut self.source, len).ok_or(oom)?;
        let layout = self.arenas.build(extent)?;
        self.free_list.push_back(&mut self.arenas, layout.first_block);
        self.stats.heap_size += len;
        self.stats.arenas += 1;
        self.record_lifecycle(
            AllocatorLogLevel::Debug,
            "arena_grow",
            Some(layout.start),
            Some(len),
            "success",
            if capacity > self.config.arena_size {
                "oversized"
            } else {
                "regular"
            },
        );
        Ok(layout)
    }

    // -----------------------------------------------------------------------
    // Pointers and payloads
    // -----------------------------------------------------------------------

    pub(crate) fn payload_ptr(&self, block: usize) -> NonNull<u8> {
        self.arenas.ptr_at(block + HEADER_SIZE)
    }

    /// Maps a payload pointer back to its header offset, rejecting pointers
    /// this heap did not hand out or whose block is not allocated.
    pub(crate) fn resolve(&mut self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let addr = ptr.as_ptr() as usize;
        let result = self.resolve_addr(addr);
        if let Err(err) = &result {
            self.record_failure(err, None);
        }
        result
    }

    fn resolve_addr(&self, addr: usize) -> Result<usize, HeapError> {
        let payload = self
            .arenas
            .offset_of_addr(addr)
            .ok_or(HeapError::ForeignPointer { addr })?;
        let not_allocated = |state| HeapError::NotAllocated {
            offset: payload,
            state,
        };
        let layout = self
            .arenas
            .layout_of(payload)
            .ok_or(HeapError::ForeignPointer { addr })?;
        let block = payload
            .checked_sub(HEADER_SIZE)
            .filter(|&block| payload % 8 == 0 && layout.holds_block(block))
            .ok_or(not_allocated(None))?;

        let state = self.arenas.state(block);
        if state != Some(BlockState::Allocated) {
            return Err(not_allocated(state));
        }
        let size = self.arenas.size(block);
        if size < BLOCK_OVERHEAD || size % 8 != 0 || block + size > layout.trailing_fencepost {
            return Err(HeapError::Corrupted {
                offset: block,
                reason: "allocated block has an impossible size",
            });
        }
        let footer = block + size - FOOTER_SIZE;
        if self.arenas.footer_size(footer) != size
            || self.arenas.footer_state(footer) != Some(BlockState::Allocated)
        {
            return Err(HeapError::Corrupted {
                offset: block,
                reason: "header and footer disagree",
            });
        }
        Ok(block)
    }

    /// Payload bytes available in an allocated block.
    pub(crate) fn usable(&self, block: usize) -> usize {
        self.arenas.size(block) - BLOCK_OVERHEAD
    }

    pub(crate) fn zero_payload(&mut self, block: usize) {
        let len = self.usable(block);
        self.arenas.fill_zero(block + HEADER_SIZE, len);
    }

    pub(crate) fn copy_payload(&mut self, from: usize, to: usize, len: usize) {
        self.arenas
            .copy(from + HEADER_SIZE, to + HEADER_SIZE, len);
    }

    pub(crate) fn payload(&self, block: usize) -> &[u8] {
        self.arenas.bytes(block + HEADER_SIZE, self.usable(block))
    }

    pub(crate) fn payload_mut(&mut self, block: usize) -> &mut [u8] {
        let len = self.usable(block);
        self.arenas.bytes_mut(block + HEADER_SIZE, len)
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn summary(&self) -> HeapSummary {
        diag::summary(self.stats, &self.free_list, &self.arenas)
    }

    #[must_use]
    pub fn free_blocks(&self) -> Vec<FreeBlockInfo> {
        diag::free_blocks(&self.free_list, &self.arenas)
    }

    #[must_use]
    pub fn free_list_display(&self) -> FreeListDisplay<'_> {
        FreeListDisplay {
            list: &self.free_list,
            arenas: &self.arenas,
        }
    }

    #[must_use]
    pub fn walk(&self) -> Vec<BlockInfo> {
        diag::walk(&self.arenas)
    }

    pub fn verify(&self) -> Result<HeapCheck, HeapError> {
        diag::verify(&self.free_list, &self.arenas)
    }

    #[must_use]
    pub fn arenas(&self) -> &ArenaDirectory {
        &self.arenas
    }

    pub fn lifecycle_logs(&self) -> impl Iterator<Item = &AllocatorLogRecord> + '_ {
        self.logs.iter()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.logs.drain()
    }

    // -----------------------------------------------------------------------
    // Lifecycle records
    // -----------------------------------------------------------------------

    pub(super) fn record_lifecycle(
        &mut self,
        level: AllocatorLogLevel,
        event: &'static str,
        offset: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        path: &'static str,
    ) {
        if !self.logs.enabled(level) {
            return;
        }
        self.logs.push(AllocatorLogRecord {
            decision_id: 0,
            level,
            symbol: self.symbol.as_str(),
            event,
            offset,
            size,
            outcome,
            path,
            arena_count: self.arenas.len(),
            heap_size: self.stats.heap_size,
            free_blocks: self.free_list.len(),
        });
    }

    pub(super) fn record_failure(&mut self, err: &HeapError, size: Option<usize>) {
        let (level, offset) = match *err {
            HeapError::OutOfMemory { .. } | HeapError::SizeOverflow { .. } => {
                (AllocatorLogLevel::Warn, None)
            }
            HeapError::ForeignPointer { .. } => (AllocatorLogLevel::Debug, None),
            HeapError::NotAllocated { offset, .. } => (AllocatorLogLevel::Warn, Some(offset)),
            HeapError::Corrupted { offset, .. } => (AllocatorLogLevel::Error, Some(offset)),
        };
        self.record_lifecycle(level, "rejected", offset, size, err.outcome(), "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ARENA_SIZE;
    use crate::malloc::source::BufferSource;

    fn heap(arena_size: usize) -> Box<Heap<BufferSource>> {
        let config = AllocatorConfig::DEFAULT
            .with_arena_size(arena_size)
            .with_log_level(Some(AllocatorLogLevel::Trace));
        Box::new(Heap::new(BufferSource::new(), ConfigSource::Fixed(config)))
    }

    #[test]
    fn first_allocation_builds_one_arena_and_splits() {
        let mut heap = heap(4096);
        let block = heap.allocate(8).unwrap();
        assert_eq!(block, FOOTER_SIZE);
        assert_eq!(heap.arenas.size(block), 56);
        assert_eq!(heap.stats.arenas, 1);
        assert_eq!(heap.stats.heap_size, 4096 + ARENA_OVERHEAD);

        let free = heap.free_blocks();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].offset, block + 56);
        assert_eq!(free[0].size, 4096 + BLOCK_OVERHEAD - 56);
        heap.verify().unwrap();
    }

    #[test]
    fn small_remainder_is_not_split() {
        let mut heap = heap(4096);
        // Leave exactly MIN_SPLIT_REMAINDER bytes: the whole block is handed out.
        let whole = 4096 + BLOCK_OVERHEAD;
        let request = whole - MIN_SPLIT_REMAINDER - BLOCK_OVERHEAD;
        let block = heap.allocate(request).unwrap();
        assert_eq!(heap.arenas.size(block), whole);
        assert!(heap.free_list.is_empty());
        heap.verify().unwrap();
    }

    #[test]
    fn split_remainder_keeps_list_position() {
        let mut heap = heap(4096);
        heap.ensure_initialized().unwrap();
        heap.grow(0).unwrap();
        let blocks_before = heap.free_blocks();
        assert_eq!(blocks_before.len(), 2);

        let block = heap.allocate(100).unwrap();
        assert_eq!(block, blocks_before[0].offset);
        let after = heap.free_blocks();
        assert_eq!(after[0].offset, block + heap.arenas.size(block));
        assert_eq!(after[1], blocks_before[1]);
    }

    #[test]
    fn oversized_request_gets_its_own_arena() {
        let mut heap = heap(4096);
        let block = heap.allocate(3 * 4096).unwrap();
        assert_eq!(heap.stats.arenas, 2);
        assert!(heap.usable(block) >= 3 * 4096);
        let oversized = heap
            .lifecycle_logs()
            .filter(|r| r.event == "arena_grow" && r.path == "oversized")
            .count();
        assert_eq!(oversized, 1);
        heap.verify().unwrap();
    }

    #[test]
    fn exhausted_source_reports_out_of_memory() {
        let config = AllocatorConfig::DEFAULT.with_arena_size(4096);
        let mut heap = Box::new(Heap::new(
            BufferSource::with_limit(4096 + ARENA_OVERHEAD),
            ConfigSource::Fixed(config),
        ));
        assert!(heap.allocate(1000).is_ok());
        let err = heap.allocate(8000).unwrap_err();
        assert_eq!(err, HeapError::OutOfMemory { requested: 8048 });
        assert!(
            heap.lifecycle_logs()
                .any(|r| r.outcome == "oom" && r.level == AllocatorLogLevel::Warn)
        );
        heap.verify().unwrap();
    }

    #[test]
    fn failed_first_arena_is_recorded() {
        let config = AllocatorConfig::DEFAULT.with_arena_size(4096);
        let mut heap = Box::new(Heap::new(
            BufferSource::with_limit(1024),
            ConfigSource::Fixed(config),
        ));
        assert!(matches!(heap.allocate(16), Err(HeapError::OutOfMemory { .. })));
        assert!(!heap.is_initialized());
        let rejected: Vec<_> = heap
            .lifecycle_logs()
            .filter(|r| r.event == "rejected")
            .copied()
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].outcome, "oom");
        assert_eq!(rejected[0].size, Some(16));
        assert_eq!(rejected[0].arena_count, 0);
    }

    #[test]
    fn overflowing_request_is_rejected() {
        let mut heap = heap(DEFAULT_ARENA_SIZE);
        assert!(matches!(
            heap.allocate(usize::MAX - 4),
            Err(HeapError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn resolve_rejects_foreign_and_unallocated_pointers() {
        let mut heap = heap(4096);
        let block = heap.allocate(64).unwrap();
        let ptr = heap.payload_ptr(block);
        assert_eq!(heap.resolve(ptr), Ok(block));

        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(matches!(
            heap.resolve(foreign),
            Err(HeapError::ForeignPointer { .. })
        ));

        let free = heap.free_blocks()[0].offset;
        let free_ptr = heap.payload_ptr(free);
        assert_eq!(
            heap.resolve(free_ptr),
            Err(HeapError::NotAllocated {
                offset: free + HEADER_SIZE,
                state: Some(BlockState::Free),
            })
        );
    }
}
