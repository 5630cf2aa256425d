// Allocator entry points take raw pointers from C callers; the heap guards
// reject foreign and unallocated pointers at runtime.
#![allow(clippy::missing_safety_doc)]
//! # boundtag-abi
//!
//! C ABI for the boundtag allocator.
//!
//! Built as a `cdylib`, this crate can be preloaded in front of the host libc
//! to replace `malloc`, `free`, `calloc`, and `realloc` for a whole process.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> reentry guard -> Allocator (boundtag-core)
//!                                  \-> host libc on nested calls / foreign pointers
//! ```
//!
//! The allocator symbols are exported unmangled only in release builds, so
//! debug and test binaries keep their own allocator.

#[macro_use]
mod macros;

pub mod allocator_state;
pub mod diag_abi;
pub mod reentry;
pub mod report;

// Gated behind cfg(not(test)) because release builds export these as
// `malloc`/`free`/..., which would replace the test binary's own allocator.
#[cfg(not(test))]
pub mod malloc_abi;
