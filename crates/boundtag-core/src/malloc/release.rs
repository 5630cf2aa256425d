//! Release engine.
//!
//! A released block is merged with whichever neighbours are free, so no two
//! adjacent blocks are ever free once a release returns:
//!
//! | left | right | result                                                    |
//! |------|-------|-----------------------------------------------------------|
//! | busy | free  | block absorbs right; right unlinked; merged block at head |
//! | free | busy  | left absorbs block; left keeps its list position          |
//! | free | free  | left absorbs both; right unlinked                         |
//! | busy | busy  | block inserted after the last lower-addressed node        |
//!
//! Fenceposts carry the `Sentinel` state, so they always count as busy.

use super::block::{BlockState, Link, TagStore};
use super::heap::Heap;
use super::log::AllocatorLogLevel;
use super::source::MemorySource;

impl<S: MemorySource> Heap<S> {
    /// Returns the allocated block at header offset `block` to the free list.
    pub(crate) fn release(&mut self, block: usize) {
        let size = self.arenas.size(block);
        let right = self.arenas.right_of(block);
        let left_free = self.arenas.left_state(block) == Some(BlockState::Free);
        let right_free = self.arenas.state(right) == Some(BlockState::Free);

        let (merged, path) = match (left_free, right_free) {
            (false, true) => {
                let right_size = self.arenas.size(right);
                self.free_list.remove(&mut self.arenas, right);
                self.arenas.write_tags(block, size + right_size, BlockState::Free);
                self.free_list.push_front(&mut self.arenas, block);
                (block, "merge_right")
            }
            (true, false) => {
                let left = self.arenas.left_of(block);
                let left_size = self.arenas.size(left);
                self.arenas.retire_header(block);
                self.arenas.write_tags(left, left_size + size, BlockState::Free);
                (left, "merge_left")
            }
            (true, true) => {
                let left = self.arenas.left_of(block);
                let left_size = self.arenas.size(left);
                let right_size = self.arenas.size(right);
                self.free_list.remove(&mut self.arenas, right);
                self.arenas.retire_header(block);
                self.arenas.write_tags(left, left_size + size + right_size, BlockState::Free);
                (left, "merge_both")
            }
            (false, false) => {
                self.arenas.set_state(block, BlockState::Free);
                let after = self.free_list.last_below(&self.arenas, block);
                self.free_list.insert_after(&mut self.arenas, after, block);
                (
                    block,
                    if after == Link::Sentinel {
                        "insert_head"
                    } else {
                        "insert_ordered"
                    },
                )
            }
        };
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "free",
            Some(merged),
            Some(self.arenas.size(merged)),
            "success",
            path,
        );
    }
}
