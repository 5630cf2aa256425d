//! OS memory sources.
//!
//! A source hands out raw extents that are never returned while the heap is
//! alive. Arenas are built on top of them.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::raw::RawExtent;

/// Provider of raw extents for new arenas.
///
/// # Safety
///
/// Every pointer returned by [`obtain`](MemorySource::obtain) must be 8-aligned,
/// valid for reads and writes of `len` bytes until the source is dropped, and
/// disjoint from every other extent the source has returned.
pub unsafe trait MemorySource: Send {
    /// Obtains a fresh extent of `len` bytes, or `None` when the source is
    /// exhausted.
    fn obtain(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Total bytes handed out so far.
    fn obtained_bytes(&self) -> usize;
}

pub(crate) fn obtain_extent<S: MemorySource>(source: &mut S, len: usize) -> Option<RawExtent> {
    let base = source.obtain(len)?;
    // SAFETY: the `MemorySource` contract guarantees alignment, validity for
    // `len` bytes, and exclusivity for the lifetime of the source, which the
    // heap owns alongside its extents.
    Some(unsafe { RawExtent::new(base, len) })
}

// ---------------------------------------------------------------------------
// Anonymous mappings
// ---------------------------------------------------------------------------

/// Private anonymous `mmap` regions. Mappings are never unmapped.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct MmapSource {
    obtained: usize,
}

#[cfg(unix)]
impl MmapSource {
    #[must_use]
    pub const fn new() -> Self {
        Self { obtained: 0 }
    }
}

// SAFETY: mmap returns page-aligned, fresh, private mappings that stay valid
// for the life of the process.
#[cfg(unix)]
unsafe impl MemorySource for MmapSource {
    fn obtain(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        // SAFETY: anonymous private mapping with no address hint.
        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return None;
        }
        self.obtained += len;
        NonNull::new(mem.cast::<u8>())
    }

    fn obtained_bytes(&self) -> usize {
        self.obtained
    }
}

// ---------------------------------------------------------------------------
// Boxed buffers
// ---------------------------------------------------------------------------

/// Extents carved from boxed `u64` buffers, released when the source drops.
///
/// Intended for tests, benchmarks, and the harness, where each allocator
/// instance should own its memory. An optional limit caps the total bytes
/// handed out so exhaustion paths can be exercised.
#[derive(Debug, Default)]
pub struct BufferSource {
    buffers: Vec<NonNull<[u64]>>,
    obtained: usize,
    limit: Option<usize>,
}

// SAFETY: the buffers are uniquely owned by the source.
unsafe impl Send for BufferSource {}

impl BufferSource {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffers: Vec::new(),
            obtained: 0,
            limit: None,
        }
    }

    /// A source that refuses to hand out more than `limit` bytes in total.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            buffers: Vec::new(),
            obtained: 0,
            limit: Some(limit),
        }
    }

    /// Number of extents handed out.
    #[must_use]
    pub fn extents(&self) -> usize {
        self.buffers.len()
    }
}

// SAFETY: each extent is a distinct leaked boxed slice of u64 (8-aligned),
// reclaimed only in `Drop`.
unsafe impl MemorySource for BufferSource {
    fn obtain(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        let total = self.obtained.checked_add(len)?;
        if self.limit.is_some_and(|limit| total > limit) {
            return None;
        }
        let words = len.div_ceil(8);
        let buffer: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        let raw = NonNull::from(Box::leak(buffer));
        self.buffers.push(raw);
        self.obtained = total;
        Some(raw.cast::<u8>())
    }

    fn obtained_bytes(&self) -> usize {
        self.obtained
    }
}

impl Drop for BufferSource {
    fn drop(&mut self) {
        for raw in self.buffers.drain(..) {
            // SAFETY: produced by `Box::leak` in `obtain` and dropped once.
            drop(unsafe { Box::from_raw(raw.as_ptr()) });
        }
    }
}
