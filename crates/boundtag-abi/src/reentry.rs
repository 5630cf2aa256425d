//! Per-thread allocator reentry guard.
//!
//! Work done while the heap lock is held can call back into `malloc` on the
//! same thread (lock parking bookkeeping, `atexit` registration). Those
//! nested calls must not touch the heap again, so they are served by the
//! host libc instead.

use std::cell::Cell;

thread_local! {
    static ALLOCATOR_REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Held for the duration of one top-level allocator call.
pub struct AllocatorReentryGuard(());

impl Drop for AllocatorReentryGuard {
    fn drop(&mut self) {
        ALLOCATOR_REENTRY_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

/// Enters the allocator on this thread. Returns `None` when the thread is
/// already inside it.
#[inline]
#[must_use]
pub fn enter_allocator_reentry_guard() -> Option<AllocatorReentryGuard> {
    ALLOCATOR_REENTRY_DEPTH.with(|depth| {
        let current = depth.get();
        if current > 0 {
            None
        } else {
            depth.set(current + 1);
            Some(AllocatorReentryGuard(()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_entry_is_refused_until_guard_drops() {
        let outer = enter_allocator_reentry_guard();
        assert!(outer.is_some());
        assert!(enter_allocator_reentry_guard().is_none());
        drop(outer);
        assert!(enter_allocator_reentry_guard().is_some());
    }

    #[test]
    fn depth_is_per_thread() {
        let _outer = enter_allocator_reentry_guard().unwrap();
        let other = std::thread::spawn(|| enter_allocator_reentry_guard().is_some())
            .join()
            .unwrap();
        assert!(other);
    }
}
