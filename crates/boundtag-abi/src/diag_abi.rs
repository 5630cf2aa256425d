//! Diagnostic entry points callable from C.
//!
//! Both write to standard output directly, bypassing stdio buffering, and
//! never allocate.

use crate::allocator_state::global_allocator;
use crate::report;

abi_fn! {
    /// Prints the heap statistics block (heap size and call counters).
    fn boundtag_print_stats() {
        report::write_stats(libc::STDOUT_FILENO, global_allocator().stats());
    }
}

abi_fn! {
    /// Prints the free list in traversal order with heap-relative offsets.
    fn boundtag_print_free_list() {
        global_allocator().with_heap(|heap| {
            report::write_free_list(libc::STDOUT_FILENO, heap.free_list_display())
        });
    }
}
