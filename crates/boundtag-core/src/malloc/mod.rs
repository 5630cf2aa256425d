//! Memory allocation.
//!
//! Boundary-tag heap with a single first-fit free list:
//! - `block`: header/footer tag encoding and the `TagStore` accessors
//! - `arena`: OS extents laid out as one free block between two fenceposts
//! - `free_list`: sentinel-anchored circular doubly-linked list of free blocks
//! - `heap`: allocation engine (first fit, split, grow-and-retry)
//! - `release`: release engine (coalescing in both directions)
//! - `allocator`: the locked public surface

pub mod allocator;
pub mod arena;
pub mod block;
pub mod diag;
pub mod free_list;
pub mod heap;
pub mod log;
mod raw;
mod release;
pub mod source;

pub use allocator::Allocator;
pub use block::{BlockState, Link, TagStore};
pub use diag::{BlockInfo, FreeBlockInfo, FreeListDisplay, HeapCheck, HeapStats, HeapSummary};
pub use heap::Heap;
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
#[cfg(unix)]
pub use source::MmapSource;
pub use source::{BufferSource, MemorySource};
