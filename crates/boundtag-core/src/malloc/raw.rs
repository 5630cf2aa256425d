//! Raw view over one OS extent.
//!
//! All pointer arithmetic in the crate happens here. Accessors bounds-check
//! against the extent length and panic on violation, which only a corrupted
//! heap can trigger.

#![allow(unsafe_code)]

use std::ptr::NonNull;

/// A contiguous, 8-aligned, exclusively owned memory extent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawExtent {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the extent is plain memory owned by the heap; every access is
// serialized by the allocator lock.
unsafe impl Send for RawExtent {}

impl RawExtent {
    pub(crate) const EMPTY: Self = Self {
        base: NonNull::dangling(),
        len: 0,
    };

    /// # Safety
    ///
    /// `base` must be 8-aligned and valid for reads and writes of `len` bytes
    /// for as long as this extent (or a copy) is used, and nothing else may
    /// access that memory except through payload pointers the heap hands out.
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % 8, 0);
        Self { base, len }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub(crate) fn contains_addr(&self, addr: usize) -> bool {
        addr >= self.addr() && addr - self.addr() < self.len
    }

    #[inline]
    fn check(&self, local: usize, len: usize) {
        assert!(
            local.checked_add(len).is_some_and(|end| end <= self.len),
            "boundtag: access {local:#x}+{len} outside extent of {} bytes",
            self.len
        );
    }

    pub(crate) fn read_word(&self, local: usize) -> u64 {
        self.check(local, 8);
        debug_assert_eq!(local % 8, 0);
        // SAFETY: in bounds (checked) and 8-aligned (base and local are).
        unsafe { self.base.as_ptr().add(local).cast::<u64>().read() }
    }

    pub(crate) fn write_word(&mut self, local: usize, value: u64) {
        self.check(local, 8);
        debug_assert_eq!(local % 8, 0);
        // SAFETY: in bounds (checked) and 8-aligned (base and local are).
        unsafe { self.base.as_ptr().add(local).cast::<u64>().write(value) }
    }

    pub(crate) fn ptr_at(&self, local: usize) -> NonNull<u8> {
        self.check(local, 0);
        // SAFETY: `local <= len`, so the result stays inside (or one past) the extent.
        unsafe { self.base.add(local) }
    }

    pub(crate) fn fill_zero(&mut self, local: usize, len: usize) {
        self.check(local, len);
        // SAFETY: range checked above.
        unsafe { self.base.as_ptr().add(local).write_bytes(0, len) }
    }

    /// Copies `len` bytes from this extent into `dst`. Ranges may overlap.
    pub(crate) fn copy_to(&self, local: usize, dst: &mut RawExtent, dst_local: usize, len: usize) {
        self.check(local, len);
        dst.check(dst_local, len);
        // SAFETY: both ranges checked above; `copy` tolerates overlap.
        unsafe {
            std::ptr::copy(
                self.base.as_ptr().add(local),
                dst.base.as_ptr().add(dst_local),
                len,
            );
        }
    }

    pub(crate) fn bytes(&self, local: usize, len: usize) -> &[u8] {
        self.check(local, len);
        // SAFETY: range checked; the heap lock is held by the caller for the
        // lifetime of the borrow.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(local), len) }
    }

    pub(crate) fn bytes_mut(&mut self, local: usize, len: usize) -> &mut [u8] {
        self.check(local, len);
        // SAFETY: as for `bytes`, and the borrow is unique through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(local), len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_access_and_copy() {
        let mut backing = vec![0u64; 8].into_boxed_slice();
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        // SAFETY: `backing` outlives the extent and is not touched otherwise.
        let mut extent = unsafe { RawExtent::new(base, 64) };
        extent.write_word(8, 0xdead_beef);
        assert_eq!(extent.read_word(8), 0xdead_beef);

        let mut dst = extent;
        extent.copy_to(8, &mut dst, 32, 8);
        assert_eq!(extent.read_word(32), 0xdead_beef);

        extent.fill_zero(8, 8);
        assert_eq!(extent.read_word(8), 0);
        assert!(extent.contains_addr(extent.addr() + 63));
        assert!(!extent.contains_addr(extent.addr() + 64));
    }

    #[test]
    #[should_panic(expected = "outside extent")]
    fn out_of_bounds_word_panics() {
        let mut backing = vec![0u64; 2].into_boxed_slice();
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        // SAFETY: `backing` outlives the extent.
        let extent = unsafe { RawExtent::new(base, 16) };
        extent.read_word(16);
    }
}
