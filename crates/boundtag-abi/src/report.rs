//! Allocation-free text output.
//!
//! Reports are formatted with `core::fmt` into a fixed stack buffer and
//! written straight to a file descriptor. Nothing here may allocate: it runs
//! from the exit hook and from diagnostics called while the heap is locked.

use std::ffi::c_int;
use std::fmt::{self, Write};

use boundtag_core::HeapStats;
use boundtag_core::malloc::FreeListDisplay;

const BUFFER_LEN: usize = 256;

/// Buffered `fmt::Write` sink over a raw file descriptor.
pub struct FdWriter {
    fd: c_int,
    buf: [u8; BUFFER_LEN],
    len: usize,
    failed: bool,
}

impl FdWriter {
    #[must_use]
    pub const fn new(fd: c_int) -> Self {
        Self {
            fd,
            buf: [0; BUFFER_LEN],
            len: 0,
            failed: false,
        }
    }

    /// Writes out buffered bytes. Returns `false` once any write has failed.
    pub fn flush(&mut self) -> bool {
        let mut written = 0;
        while written < self.len && !self.failed {
            let pending = &self.buf[written..self.len];
            // SAFETY: `pending` is a valid initialized byte slice.
            let rc = unsafe { libc::write(self.fd, pending.as_ptr().cast(), pending.len()) };
            if rc > 0 {
                written += rc as usize;
            } else if rc < 0 && last_errno() == libc::EINTR {
                continue;
            } else {
                self.failed = true;
            }
        }
        self.len = 0;
        !self.failed
    }
}

impl Write for FdWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            if self.len == BUFFER_LEN && !self.flush() {
                return Err(fmt::Error);
            }
            let take = bytes.len().min(BUFFER_LEN - self.len);
            self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
            self.len += take;
            bytes = &bytes[take..];
        }
        Ok(())
    }
}

impl Drop for FdWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn last_errno() -> c_int {
    // SAFETY: errno storage is valid for the calling thread.
    unsafe { *libc::__errno_location() }
}

/// Writes the heap statistics block.
pub fn write_stats(fd: c_int, stats: HeapStats) -> bool {
    let mut out = FdWriter::new(fd);
    write!(out, "{stats}").is_ok() && out.flush()
}

/// Writes one `FreeList: ...` line.
pub fn write_free_list(fd: c_int, list: FreeListDisplay<'_>) -> bool {
    let mut out = FdWriter::new(fd);
    writeln!(out, "{list}").is_ok() && out.flush()
}
