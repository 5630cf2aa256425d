//! Locked allocator surface.
//!
//! `Allocator` wraps a [`Heap`] in one `parking_lot::Mutex`. Each public
//! call takes the lock exactly once and holds it for the whole operation,
//! including arena growth and payload copies, so there is never more than
//! one thread inside the engine.
//!
//! The allocator is `const`-constructible and can live in a `static`; the
//! heap itself is initialized on the first allocation.

use std::ptr::NonNull;

use parking_lot::{Mutex, const_mutex};

use super::diag::{BlockInfo, FreeBlockInfo, HeapCheck, HeapStats, HeapSummary};
use super::heap::{ApiSymbol, Heap};
use super::log::AllocatorLogRecord;
use super::source::MemorySource;
use crate::config::{AllocatorConfig, ConfigSource};
use crate::error::HeapError;

pub struct Allocator<S: MemorySource> {
    heap: Mutex<Heap<S>>,
}

impl<S: MemorySource> Allocator<S> {
    /// An allocator using the default configuration.
    pub const fn new(source: S) -> Self {
        Self::with_config(source, AllocatorConfig::DEFAULT)
    }

    pub const fn with_config(source: S, config: AllocatorConfig) -> Self {
        Self {
            heap: const_mutex(Heap::new(source, ConfigSource::Fixed(config))),
        }
    }

    /// An allocator whose configuration is produced by `resolve` on first use.
    pub const fn deferred(source: S, resolve: fn() -> AllocatorConfig) -> Self {
        Self {
            heap: const_mutex(Heap::new(source, ConfigSource::Deferred(resolve))),
        }
    }

    /// Allocates at least `size` bytes, 8-byte aligned. `size == 0` yields a
    /// distinct minimal block.
    pub fn malloc(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let mut heap = self.heap.lock();
        heap.enter(ApiSymbol::Malloc);
        let block = heap.allocate(size)?;
        Ok(heap.payload_ptr(block))
    }

    /// Releases a pointer returned by this allocator. `None` is a no-op that
    /// still counts as a call.
    ///
    /// Pointers outside every arena and blocks that are not allocated are
    /// rejected without touching the heap. Interior pointers into live blocks
    /// are not detected.
    pub fn free(&self, ptr: Option<NonNull<u8>>) -> Result<(), HeapError> {
        let mut heap = self.heap.lock();
        heap.enter(ApiSymbol::Free);
        let Some(ptr) = ptr else {
            return Ok(());
        };
        let block = heap.resolve(ptr)?;
        heap.release(block);
        Ok(())
    }

    /// Allocates `count * size` bytes with the whole usable region zeroed.
    pub fn calloc(&self, count: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        let mut heap = self.heap.lock();
        heap.enter(ApiSymbol::Calloc);
        let Some(total) = count.checked_mul(size) else {
            let err = HeapError::SizeOverflow { count, size };
            heap.record_failure(&err, None);
            return Err(err);
        };
        let block = heap.allocate(total)?;
        heap.zero_payload(block);
        Ok(heap.payload_ptr(block))
    }

    /// Moves an allocation to a new block of at least `size` bytes, copying
    /// `min(old usable, size)` bytes. Never resizes in place. `None` behaves
    /// like [`malloc`](Self::malloc). On error the old block is untouched.
    pub fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        let mut heap = self.heap.lock();
        heap.enter(ApiSymbol::Realloc);
        let Some(ptr) = ptr else {
            let block = heap.allocate(size)?;
            return Ok(heap.payload_ptr(block));
        };
        let old = heap.resolve(ptr)?;
        let new = heap.allocate(size)?;
        let len = heap.usable(old).min(size);
        heap.copy_payload(old, new, len);
        heap.release(old);
        Ok(heap.payload_ptr(new))
    }

    /// Payload bytes usable through `ptr`; at least what was requested.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let mut heap = self.heap.lock();
        let block = heap.resolve(ptr)?;
        Ok(heap.usable(block))
    }

    /// Runs `f` over the payload of an allocated block while holding the lock.
    pub fn with_payload<R>(
        &self,
        ptr: NonNull<u8>,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, HeapError> {
        let mut heap = self.heap.lock();
        let block = heap.resolve(ptr)?;
        Ok(f(heap.payload(block)))
    }

    /// Mutable counterpart of [`with_payload`](Self::with_payload).
    pub fn with_payload_mut<R>(
        &self,
        ptr: NonNull<u8>,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, HeapError> {
        let mut heap = self.heap.lock();
        let block = heap.resolve(ptr)?;
        Ok(f(heap.payload_mut(block)))
    }

    /// Runs `f` with shared access to the heap under the lock. Nothing else
    /// can allocate from this allocator while `f` runs.
    pub fn with_heap<R>(&self, f: impl FnOnce(&Heap<S>) -> R) -> R {
        f(&self.heap.lock())
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    #[must_use]
    pub fn summary(&self) -> HeapSummary {
        self.heap.lock().summary()
    }

    /// Free-list nodes in traversal order, offsets relative to heap start.
    #[must_use]
    pub fn free_list(&self) -> Vec<FreeBlockInfo> {
        self.heap.lock().free_blocks()
    }

    /// Every block in address order.
    #[must_use]
    pub fn walk(&self) -> Vec<BlockInfo> {
        self.heap.lock().walk()
    }

    pub fn verify(&self) -> Result<HeapCheck, HeapError> {
        self.heap.lock().verify()
    }

    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.heap.lock().lifecycle_logs().copied().collect()
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.heap.lock().drain_lifecycle_logs()
    }

    #[must_use]
    pub fn config(&self) -> AllocatorConfig {
        self.heap.lock().config()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.heap.lock().is_initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::block::BlockState;
    use crate::malloc::log::AllocatorLogLevel;
    use crate::malloc::source::BufferSource;

    fn small() -> Allocator<BufferSource> {
        Allocator::with_config(
            BufferSource::new(),
            AllocatorConfig::DEFAULT
                .with_arena_size(4096)
                .with_log_level(Some(AllocatorLogLevel::Debug)),
        )
    }

    #[test]
    fn heap_is_built_lazily() {
        let alloc = small();
        assert!(!alloc.is_initialized());
        assert_eq!(alloc.stats().arenas, 0);
        alloc.malloc(1).unwrap();
        assert!(alloc.is_initialized());
        assert_eq!(alloc.stats().arenas, 1);
        assert_eq!(alloc.config().arena_size, 4096);
    }

    #[test]
    fn counters_track_every_entry_point() {
        let alloc = small();
        let a = alloc.malloc(10).unwrap();
        let b = alloc.calloc(2, 8).unwrap();
        let c = alloc.realloc(Some(a), 40).unwrap();
        alloc.free(Some(b)).unwrap();
        alloc.free(Some(c)).unwrap();
        alloc.free(None).unwrap();
        let stats = alloc.stats();
        assert_eq!(
            (stats.mallocs, stats.callocs, stats.reallocs, stats.frees),
            (1, 1, 1, 3)
        );
    }

    #[test]
    fn zero_size_requests_get_distinct_pointers() {
        let alloc = small();
        let a = alloc.malloc(0).unwrap();
        let b = alloc.malloc(0).unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.usable_size(a).unwrap(), 0);
        alloc.free(Some(a)).unwrap();
        alloc.free(Some(b)).unwrap();
        alloc.verify().unwrap();
    }

    #[test]
    fn realloc_moves_and_preserves_prefix() {
        let alloc = small();
        let p = alloc.malloc(16).unwrap();
        alloc
            .with_payload_mut(p, |bytes| {
                for (i, b) in bytes[..16].iter_mut().enumerate() {
                    *b = i as u8 + 1;
                }
            })
            .unwrap();
        let q = alloc.realloc(Some(p), 64).unwrap();
        assert_ne!(p, q);
        let prefix = alloc.with_payload(q, |bytes| bytes[..16].to_vec()).unwrap();
        assert_eq!(prefix, (1..=16).collect::<Vec<u8>>());
        assert!(matches!(
            alloc.usable_size(p),
            Err(HeapError::NotAllocated { .. })
        ));
    }

    #[test]
    fn realloc_to_zero_returns_minimal_block() {
        let alloc = small();
        let p = alloc.malloc(100).unwrap();
        let q = alloc.realloc(Some(p), 0).unwrap();
        assert_eq!(alloc.usable_size(q).unwrap(), 0);
        alloc.verify().unwrap();
    }

    #[test]
    fn double_free_is_rejected_without_damage() {
        let alloc = small();
        let p = alloc.malloc(32).unwrap();
        alloc.malloc(32).unwrap();
        alloc.free(Some(p)).unwrap();
        let err = alloc.free(Some(p)).unwrap_err();
        assert_eq!(
            err,
            HeapError::NotAllocated {
                offset: alloc.free_list()[0].offset + 32,
                state: Some(BlockState::Free),
            }
        );
        alloc.verify().unwrap();
        assert!(
            alloc
                .lifecycle_logs()
                .iter()
                .any(|r| r.symbol == "free" && r.outcome == "not_allocated")
        );
    }

    #[test]
    fn double_free_of_block_absorbed_by_both_neighbours_is_rejected() {
        let alloc = small();
        let a = alloc.malloc(64).unwrap();
        let b = alloc.malloc(64).unwrap();
        let c = alloc.malloc(64).unwrap();
        alloc.malloc(64).unwrap();
        alloc.free(Some(a)).unwrap();
        alloc.free(Some(c)).unwrap();
        alloc.free(Some(b)).unwrap();
        let before = alloc.free_list();
        alloc.verify().unwrap();

        assert!(matches!(
            alloc.free(Some(b)),
            Err(HeapError::NotAllocated {
                state: Some(BlockState::Free),
                ..
            })
        ));
        assert_eq!(alloc.free_list(), before);
        alloc.verify().unwrap();
    }

    #[test]
    fn double_free_of_block_absorbed_by_left_neighbour_is_rejected() {
        let alloc = small();
        let a = alloc.malloc(64).unwrap();
        let b = alloc.malloc(64).unwrap();
        alloc.malloc(64).unwrap();
        alloc.free(Some(a)).unwrap();
        alloc.free(Some(b)).unwrap();
        let before = alloc.free_list();

        assert!(matches!(
            alloc.free(Some(b)),
            Err(HeapError::NotAllocated {
                state: Some(BlockState::Free),
                ..
            })
        ));
        assert!(matches!(alloc.realloc(Some(b), 16), Err(HeapError::NotAllocated { .. })));
        assert_eq!(alloc.free_list(), before);
        alloc.verify().unwrap();
    }

    #[test]
    fn foreign_pointer_is_rejected() {
        let alloc = small();
        alloc.malloc(8).unwrap();
        let mut outside = [0u64; 4];
        let ptr = NonNull::from(&mut outside).cast::<u8>();
        assert!(matches!(
            alloc.free(Some(ptr)),
            Err(HeapError::ForeignPointer { .. })
        ));
        assert!(matches!(
            alloc.realloc(Some(ptr), 8),
            Err(HeapError::ForeignPointer { .. })
        ));
    }

    #[test]
    fn calloc_overflow_is_reported() {
        let alloc = small();
        assert_eq!(
            alloc.calloc(usize::MAX, 2),
            Err(HeapError::SizeOverflow {
                count: usize::MAX,
                size: 2
            })
        );
    }

    #[test]
    fn deferred_configuration_is_resolved_on_first_use() {
        fn resolve() -> AllocatorConfig {
            AllocatorConfig::DEFAULT.with_arena_size(8192).with_verbose(false)
        }
        let alloc = Allocator::deferred(BufferSource::new(), resolve);
        assert_eq!(alloc.config(), AllocatorConfig::DEFAULT);
        alloc.malloc(1).unwrap();
        assert_eq!(alloc.config().arena_size, 8192);
        assert!(!alloc.config().verbose);
    }

    #[test]
    fn free_list_display_uses_heap_offsets() {
        let alloc = small();
        let p = alloc.malloc(8).unwrap();
        alloc.malloc(8).unwrap();
        alloc.free(Some(p)).unwrap();
        let text = alloc.with_heap(|heap| heap.free_list_display().to_string());
        assert_eq!(text, "FreeList: [offset:16,size:56]->[offset:128,size:4032]");
    }
}
