//! # boundtag-core
//!
//! Boundary-tag heap engine for the boundtag allocator.
//!
//! The heap is a growing list of OS-provided arenas addressed through a single
//! heap offset space. Every block carries its size and state in both a header
//! and a footer, free blocks are threaded on a sentinel-anchored circular list,
//! and all mutation is serialized by one lock held for the whole of each public
//! operation.
//!
//! ```text
//! Allocator (guard) -> Heap -> {allocation engine, release engine}
//!                               -> free list / block tags -> arena builder -> MemorySource
//! ```
//!
//! No `unsafe` code is permitted at the crate level. The raw memory view and
//! the OS memory sources are the only modules that opt out.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod malloc;

pub use config::AllocatorConfig;
pub use error::HeapError;
#[cfg(unix)]
pub use malloc::MmapSource;
pub use malloc::{Allocator, BufferSource, Heap, HeapStats, MemorySource};
