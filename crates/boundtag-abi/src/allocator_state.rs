//! Process-wide allocator instance.
//!
//! The heap is backed by anonymous mappings and configured from the
//! environment on the first allocation. Configuration is read with
//! `libc::getenv`, which does not allocate, because the first allocation may
//! be the process's very first `malloc`.

use std::ffi::{CStr, c_char};
use std::sync::Once;

use boundtag_core::{Allocator, AllocatorConfig, MmapSource};

use crate::report;

static ALLOCATOR: Allocator<MmapSource> =
    Allocator::deferred(MmapSource::new(), config_from_process_env);

static EXIT_HOOK: Once = Once::new();

/// The allocator behind the exported entry points.
#[inline]
#[must_use]
pub fn global_allocator() -> &'static Allocator<MmapSource> {
    &ALLOCATOR
}

fn config_from_process_env() -> AllocatorConfig {
    AllocatorConfig::from_lookup(getenv_str)
}

/// Environment lookup that never allocates. Keys longer than 63 bytes and
/// non-UTF-8 values are treated as unset.
fn getenv_str(key: &'static str) -> Option<&'static str> {
    let mut name = [0u8; 64];
    let bytes = key.as_bytes();
    if bytes.len() >= name.len() || bytes.contains(&0) {
        return None;
    }
    name[..bytes.len()].copy_from_slice(bytes);
    // SAFETY: `name` is NUL-terminated.
    let value = unsafe { libc::getenv(name.as_ptr().cast::<c_char>()) };
    if value.is_null() {
        return None;
    }
    // SAFETY: getenv returns a NUL-terminated string owned by the environment.
    unsafe { CStr::from_ptr(value) }.to_str().ok()
}

/// Registers the exit-time statistics report once per process.
///
/// Called after the first successful allocation rather than under the heap
/// lock: `atexit` may itself allocate.
pub fn ensure_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: registering a plain `extern "C"` function with no captures.
        unsafe {
            libc::atexit(report_at_exit);
        }
    });
}

extern "C" fn report_at_exit() {
    if ALLOCATOR.config().verbose {
        report::write_stats(libc::STDOUT_FILENO, ALLOCATOR.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getenv_lookup_reads_process_environment() {
        assert_eq!(getenv_str("BOUNDTAG_TEST_SURELY_UNSET_VARIABLE"), None);
        let path = getenv_str("PATH");
        assert_eq!(path, std::env::var("PATH").ok().as_deref());
    }

    #[test]
    fn oversized_keys_are_unset() {
        let long: &'static str = "K".repeat(80).leak();
        assert_eq!(getenv_str(long), None);
    }
}
