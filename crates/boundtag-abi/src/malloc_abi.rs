//! ABI layer for memory allocation functions (`malloc`, `free`, `calloc`, `realloc`).
//!
//! Every entry point serves the request from the boundtag heap. Two cases go
//! to the host libc instead:
//! - nested calls made on a thread that is already inside the allocator;
//! - `free`/`realloc` of pointers outside every arena, which can only have
//!   come from such a nested call (or from before this library was loaded).
//!
//! Failures follow C conventions: null return plus `errno`.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use boundtag_core::HeapError;

use crate::allocator_state::{ensure_exit_hook, global_allocator};
use crate::reentry::enter_allocator_reentry_guard;

unsafe extern "C" {
    #[link_name = "__libc_malloc"]
    fn native_libc_malloc_sym(size: usize) -> *mut c_void;
    #[link_name = "__libc_calloc"]
    fn native_libc_calloc_sym(nmemb: usize, size: usize) -> *mut c_void;
    #[link_name = "__libc_realloc"]
    fn native_libc_realloc_sym(ptr: *mut c_void, size: usize) -> *mut c_void;
    #[link_name = "__libc_free"]
    fn native_libc_free_sym(ptr: *mut c_void);
}

#[inline]
unsafe fn native_libc_malloc(size: usize) -> *mut c_void {
    // SAFETY: direct call to libc allocator symbol.
    unsafe { native_libc_malloc_sym(size) }
}

#[inline]
unsafe fn native_libc_calloc(nmemb: usize, size: usize) -> *mut c_void {
    // SAFETY: direct call to libc allocator symbol.
    unsafe { native_libc_calloc_sym(nmemb, size) }
}

#[inline]
unsafe fn native_libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: direct call to libc allocator symbol.
    unsafe { native_libc_realloc_sym(ptr, size) }
}

#[inline]
unsafe fn native_libc_free(ptr: *mut c_void) {
    // SAFETY: direct call to libc allocator symbol.
    unsafe { native_libc_free_sym(ptr) }
}

#[inline]
fn set_abi_errno(val: c_int) {
    // SAFETY: errno storage is valid for the calling thread.
    unsafe { *libc::__errno_location() = val };
}

/// Null return with the `errno` matching `err`.
#[inline]
fn fail(err: HeapError) -> *mut c_void {
    set_abi_errno(match err {
        HeapError::OutOfMemory { .. } | HeapError::SizeOverflow { .. } => libc::ENOMEM,
        _ => libc::EINVAL,
    });
    ptr::null_mut()
}

#[inline]
fn served(ptr: NonNull<u8>) -> *mut c_void {
    ensure_exit_hook();
    ptr.as_ptr().cast()
}

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// POSIX `malloc` -- allocates `size` bytes of uninitialized memory.
///
/// Returns an 8-byte aligned pointer, or null with `errno = ENOMEM`.
/// `malloc(0)` returns a unique minimal block.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: nested call; the host allocator serves it.
        return unsafe { native_libc_malloc(size) };
    };
    match global_allocator().malloc(size) {
        Ok(ptr) => served(ptr),
        Err(err) => fail(err),
    }
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// POSIX `free` -- releases memory returned by `malloc`, `calloc`, or `realloc`.
///
/// Null is a no-op. Blocks that are not currently allocated (most double
/// frees) are ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this allocator (or the host
/// allocator) that has not been freed.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: nested call; the host allocator serves it.
        unsafe { native_libc_free(ptr) };
        return;
    };
    if let Err(HeapError::ForeignPointer { .. }) =
        global_allocator().free(NonNull::new(ptr.cast::<u8>()))
    {
        // SAFETY: the pointer did not come from any arena, so it belongs to
        // the host allocator.
        unsafe { native_libc_free(ptr) };
    }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// POSIX `calloc` -- allocates `nmemb * size` zeroed bytes.
///
/// Overflow of `nmemb * size` returns null with `errno = ENOMEM`.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: nested call; the host allocator serves it.
        return unsafe { native_libc_calloc(nmemb, size) };
    };
    match global_allocator().calloc(nmemb, size) {
        Ok(ptr) => served(ptr),
        Err(err) => fail(err),
    }
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// POSIX `realloc` -- moves an allocation to a block of `size` bytes.
///
/// Always allocates a new block, copies `min(old usable size, size)` bytes,
/// and frees the old one. Null `ptr` behaves like `malloc(size)`. On failure
/// null is returned and the old block stays valid.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from this allocator (or the host
/// allocator). After success the old pointer must not be used.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: nested call; the host allocator serves it.
        return unsafe { native_libc_realloc(ptr, size) };
    };
    match global_allocator().realloc(NonNull::new(ptr.cast::<u8>()), size) {
        Ok(new) => served(new),
        // SAFETY: foreign pointers belong to the host allocator.
        Err(HeapError::ForeignPointer { .. }) => unsafe { native_libc_realloc(ptr, size) },
        Err(err) => fail(err),
    }
}
