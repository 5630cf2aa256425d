//! Arena directory and builder.
//!
//! Arenas occupy consecutive ranges of one heap offset space: arena `k` starts
//! where arena `k - 1` ends. Heap offsets are what block links store and what
//! diagnostics report. Each arena is laid out as
//!
//! ```text
//! local 0            F                                F+cap+H+F      cap+2H+2F
//! [fencepost footer] [free block, size cap+H+F ... ]  [fencepost header]
//! ```
//!
//! The directory has a fixed capacity so that it can live in a `static`
//! without allocating.

use super::block::{BlockState, FOOTER_SIZE, HEADER_SIZE, TagStore};
use super::raw::RawExtent;
use crate::error::HeapError;

/// Maximum number of arenas one heap can hold.
pub const MAX_ARENAS: usize = 4096;

/// Extra bytes an arena needs on top of its payload capacity.
pub const ARENA_OVERHEAD: usize = 2 * HEADER_SIZE + 2 * FOOTER_SIZE;

#[derive(Debug, Clone, Copy)]
struct Arena {
    start: usize,
    extent: RawExtent,
}

impl Arena {
    const EMPTY: Self = Self {
        start: 0,
        extent: RawExtent::EMPTY,
    };

    fn end(&self) -> usize {
        self.start + self.extent.len()
    }
}

/// Layout of one arena in heap offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    /// Heap offset of the arena's first byte (the leading fencepost footer).
    pub start: usize,
    /// Heap offset one past the arena's last byte.
    pub end: usize,
    /// Header offset of the initial free block.
    pub first_block: usize,
    /// Header offset of the trailing fencepost.
    pub trailing_fencepost: usize,
}

impl ArenaLayout {
    const fn for_range(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            first_block: start + FOOTER_SIZE,
            trailing_fencepost: end - HEADER_SIZE,
        }
    }

    /// Whether `block` can be the header of a real block in this arena.
    #[must_use]
    pub const fn holds_block(&self, block: usize) -> bool {
        block >= self.first_block && block < self.trailing_fencepost
    }
}

/// Append-only set of arenas, addressable by heap offset and by address.
pub struct ArenaDirectory {
    arenas: [Arena; MAX_ARENAS],
    /// Arena indices sorted by base address.
    by_addr: [u16; MAX_ARENAS],
    len: usize,
    end: usize,
}

impl ArenaDirectory {
    pub(crate) const fn new() -> Self {
        Self {
            arenas: [Arena::EMPTY; MAX_ARENAS],
            by_addr: [0; MAX_ARENAS],
            len: 0,
            end: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == MAX_ARENAS
    }

    /// Heap offset one past the last arena.
    #[must_use]
    pub fn heap_end(&self) -> usize {
        self.end
    }

    pub fn layouts(&self) -> impl Iterator<Item = ArenaLayout> + '_ {
        self.arenas[..self.len]
            .iter()
            .map(|arena| ArenaLayout::for_range(arena.start, arena.end()))
    }

    /// Layout of the arena containing heap offset `offset`.
    #[must_use]
    pub fn layout_of(&self, offset: usize) -> Option<ArenaLayout> {
        self.index_of(offset).map(|i| {
            let arena = &self.arenas[i];
            ArenaLayout::for_range(arena.start, arena.end())
        })
    }

    fn index_of(&self, offset: usize) -> Option<usize> {
        if offset >= self.end {
            return None;
        }
        // Arenas are appended in heap-offset order.
        let idx = self.arenas[..self.len].partition_point(|arena| arena.start <= offset);
        idx.checked_sub(1)
    }

    fn locate(&self, offset: usize) -> (&Arena, usize) {
        match self.index_of(offset) {
            Some(i) => {
                let arena = &self.arenas[i];
                (arena, offset - arena.start)
            }
            None => heap_offset_out_of_range(offset),
        }
    }

    fn locate_mut(&mut self, offset: usize) -> (&mut Arena, usize) {
        match self.index_of(offset) {
            Some(i) => {
                let arena = &mut self.arenas[i];
                let local = offset - arena.start;
                (arena, local)
            }
            None => heap_offset_out_of_range(offset),
        }
    }

    /// Translates an address handed out by this heap into its heap offset.
    #[must_use]
    pub fn offset_of_addr(&self, addr: usize) -> Option<usize> {
        let sorted = &self.by_addr[..self.len];
        let idx = sorted.partition_point(|&i| self.arenas[i as usize].extent.addr() <= addr);
        let arena = &self.arenas[*sorted.get(idx.checked_sub(1)?)? as usize];
        arena
            .extent
            .contains_addr(addr)
            .then(|| arena.start + (addr - arena.extent.addr()))
    }

    /// Address of heap offset `offset`.
    pub(crate) fn ptr_at(&self, offset: usize) -> std::ptr::NonNull<u8> {
        let (arena, local) = self.locate(offset);
        arena.extent.ptr_at(local)
    }

    pub(crate) fn fill_zero(&mut self, offset: usize, len: usize) {
        let (arena, local) = self.locate_mut(offset);
        arena.extent.fill_zero(local, len);
    }

    pub(crate) fn copy(&mut self, src: usize, dst: usize, len: usize) {
        let (src_arena, src_local) = self.locate(src);
        let src_extent = src_arena.extent;
        let (dst_arena, dst_local) = self.locate_mut(dst);
        src_extent.copy_to(src_local, &mut dst_arena.extent, dst_local, len);
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        let (arena, local) = self.locate(offset);
        arena.extent.bytes(local, len)
    }

    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let (arena, local) = self.locate_mut(offset);
        arena.extent.bytes_mut(local, len)
    }

    /// Appends `extent` at the end of the heap offset space and lays it out as
    /// fencepost, free block, fencepost. Returns the layout; the free block is
    /// not yet on any free list.
    pub(crate) fn build(&mut self, extent: RawExtent) -> Result<ArenaLayout, HeapError> {
        if self.is_full() {
            return Err(HeapError::OutOfMemory {
                requested: extent.len(),
            });
        }
        debug_assert!(extent.len() > ARENA_OVERHEAD && extent.len() % 8 == 0);
        let start = self.end;
        let end = start
            .checked_add(extent.len())
            .ok_or(HeapError::OutOfMemory {
                requested: extent.len(),
            })?;

        let index = self.len;
        self.arenas[index] = Arena { start, extent };
        let slot = self.by_addr[..index]
            .partition_point(|&i| self.arenas[i as usize].extent.addr() < extent.addr());
        self.by_addr.copy_within(slot..index, slot + 1);
        self.by_addr[slot] = index as u16;
        self.len += 1;
        self.end = end;

        let layout = ArenaLayout::for_range(start, end);
        self.write_leading_fencepost(layout.start);
        self.write_tags(
            layout.first_block,
            layout.trailing_fencepost - layout.first_block,
            BlockState::Free,
        );
        self.write_trailing_fencepost(layout.trailing_fencepost);
        Ok(layout)
    }
}

impl TagStore for ArenaDirectory {
    fn word(&self, offset: usize) -> u64 {
        let (arena, local) = self.locate(offset);
        arena.extent.read_word(local)
    }

    fn set_word(&mut self, offset: usize, value: u64) {
        let (arena, local) = self.locate_mut(offset);
        arena.extent.write_word(local, value);
    }
}

#[cold]
#[inline(never)]
fn heap_offset_out_of_range(offset: usize) -> ! {
    panic!("boundtag: heap offset {offset:#x} is outside every arena")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::block::FENCEPOST_SIZE;
    use crate::malloc::source::{BufferSource, obtain_extent};

    fn directory_with(source: &mut BufferSource, caps: &[usize]) -> Box<ArenaDirectory> {
        let mut dir = Box::new(ArenaDirectory::new());
        for &cap in caps {
            let extent = obtain_extent(source, cap + ARENA_OVERHEAD).unwrap();
            dir.build(extent).unwrap();
        }
        dir
    }

    #[test]
    fn arena_layout_has_fenceposts_and_one_free_block() {
        let mut source = BufferSource::new();
        let dir = directory_with(&mut source, &[4096]);
        let layout = dir.layouts().next().unwrap();
        assert_eq!(layout.start, 0);
        assert_eq!(layout.end, 4096 + ARENA_OVERHEAD);
        assert_eq!(layout.first_block, FOOTER_SIZE);
        assert_eq!(dir.left_state(layout.first_block), Some(BlockState::Sentinel));
        assert_eq!(dir.footer_size(0), FENCEPOST_SIZE);
        assert_eq!(dir.size(layout.first_block), 4096 + HEADER_SIZE + FOOTER_SIZE);
        assert_eq!(dir.state(layout.first_block), Some(BlockState::Free));
        assert_eq!(dir.right_of(layout.first_block), layout.trailing_fencepost);
        assert_eq!(dir.state(layout.trailing_fencepost), Some(BlockState::Sentinel));
        assert_eq!(dir.size(layout.trailing_fencepost), FENCEPOST_SIZE);
    }

    #[test]
    fn arenas_are_consecutive_in_heap_offsets() {
        let mut source = BufferSource::new();
        let dir = directory_with(&mut source, &[4096, 8192, 4096]);
        let layouts: Vec<_> = dir.layouts().collect();
        assert_eq!(layouts.len(), 3);
        for pair in layouts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(dir.heap_end(), layouts[2].end);
        assert_eq!(dir.layout_of(layouts[1].start + 100), Some(layouts[1]));
        assert_eq!(dir.layout_of(dir.heap_end()), None);
    }

    #[test]
    fn addresses_map_back_to_heap_offsets() {
        let mut source = BufferSource::new();
        let dir = directory_with(&mut source, &[4096, 4096]);
        for layout in dir.layouts() {
            let ptr = dir.ptr_at(layout.first_block + HEADER_SIZE);
            assert_eq!(
                dir.offset_of_addr(ptr.as_ptr() as usize),
                Some(layout.first_block + HEADER_SIZE)
            );
        }
        let outside = 0u64;
        assert_eq!(dir.offset_of_addr(&outside as *const u64 as usize), None);
    }
}
