//! Boundary-tag block format.
//!
//! Every block starts with a 32-byte header and ends with a 16-byte footer.
//! Both carry the block's total size and state, so the right neighbour sits at
//! `header + size` and the left neighbour's footer immediately precedes the
//! header. Only free blocks use the `next`/`prev` link words.
//!
//! ```text
//! header: [size][state][next][prev]   payload ...   footer: [size][state]
//!         0     8      16    24                             size-16 size-8
//! ```

use serde::Serialize;

/// Header bytes in front of every payload.
pub const HEADER_SIZE: usize = 32;
/// Footer bytes after every payload.
pub const FOOTER_SIZE: usize = 16;
/// Per-block metadata cost; also the size of the smallest block.
pub const BLOCK_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;
/// Payload alignment and size granularity.
pub const ALIGNMENT: usize = 8;
/// A free block is split only when the leftover exceeds this many bytes.
pub const MIN_SPLIT_REMAINDER: usize = BLOCK_OVERHEAD + ALIGNMENT;
/// Reserved size stamped on arena fenceposts.
pub const FENCEPOST_SIZE: usize = 123_456_789;

const SIZE_WORD: usize = 0;
const STATE_WORD: usize = 8;
const NEXT_WORD: usize = 16;
const PREV_WORD: usize = 24;

/// Link word value naming the free-list sentinel.
pub const SENTINEL_LINK: u64 = u64::MAX;

/// Block state as stored in headers and footers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    Free,
    Allocated,
    /// Fenceposts and the free-list sentinel.
    Sentinel,
}

impl BlockState {
    #[must_use]
    pub const fn to_word(self) -> u64 {
        match self {
            Self::Free => 0,
            Self::Allocated => 1,
            Self::Sentinel => 2,
        }
    }

    #[must_use]
    pub const fn from_word(word: u64) -> Option<Self> {
        match word {
            0 => Some(Self::Free),
            1 => Some(Self::Allocated),
            2 => Some(Self::Sentinel),
            _ => None,
        }
    }
}

/// A free-list link: either the sentinel or a block header offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    Sentinel,
    Block(usize),
}

impl Link {
    #[must_use]
    pub const fn to_word(self) -> u64 {
        match self {
            Self::Sentinel => SENTINEL_LINK,
            Self::Block(offset) => offset as u64,
        }
    }

    #[must_use]
    pub const fn from_word(word: u64) -> Self {
        if word == SENTINEL_LINK {
            Self::Sentinel
        } else {
            Self::Block(word as usize)
        }
    }

    #[must_use]
    pub const fn block(self) -> Option<usize> {
        match self {
            Self::Sentinel => None,
            Self::Block(offset) => Some(offset),
        }
    }
}

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
#[must_use]
pub const fn align8(n: usize) -> Option<usize> {
    match n.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Total block size needed to serve `requested` payload bytes.
#[must_use]
pub const fn rounded_block_size(requested: usize) -> Option<usize> {
    match requested.checked_add(BLOCK_OVERHEAD) {
        Some(total) => align8(total),
        None => None,
    }
}

/// Word-addressed storage that block tags live in.
///
/// Offsets are heap offsets. Implementations own the bounds policy; the
/// provided methods only compute positions.
pub trait TagStore {
    fn word(&self, offset: usize) -> u64;
    fn set_word(&mut self, offset: usize, value: u64);

    fn size(&self, block: usize) -> usize {
        self.word(block + SIZE_WORD) as usize
    }

    fn state(&self, block: usize) -> Option<BlockState> {
        BlockState::from_word(self.word(block + STATE_WORD))
    }

    fn footer_of(&self, block: usize) -> usize {
        block + self.size(block) - FOOTER_SIZE
    }

    fn footer_size(&self, footer: usize) -> usize {
        self.word(footer + SIZE_WORD) as usize
    }

    fn footer_state(&self, footer: usize) -> Option<BlockState> {
        BlockState::from_word(self.word(footer + STATE_WORD))
    }

    /// Writes size and state into both the header and the footer. Link words
    /// are left alone.
    fn write_tags(&mut self, block: usize, size: usize, state: BlockState) {
        self.set_word(block + SIZE_WORD, size as u64);
        self.set_word(block + STATE_WORD, state.to_word());
        let footer = block + size - FOOTER_SIZE;
        self.set_word(footer + SIZE_WORD, size as u64);
        self.set_word(footer + STATE_WORD, state.to_word());
    }

    fn set_state(&mut self, block: usize, state: BlockState) {
        let size = self.size(block);
        self.write_tags(block, size, state);
    }

    /// Marks the header of a block that was absorbed into its left neighbour.
    /// Only the header state word is touched; the footer may now belong to
    /// the merged block.
    fn retire_header(&mut self, block: usize) {
        self.set_word(block + STATE_WORD, BlockState::Free.to_word());
    }

    fn next(&self, block: usize) -> Link {
        Link::from_word(self.word(block + NEXT_WORD))
    }

    fn prev(&self, block: usize) -> Link {
        Link::from_word(self.word(block + PREV_WORD))
    }

    fn set_next(&mut self, block: usize, link: Link) {
        self.set_word(block + NEXT_WORD, link.to_word());
    }

    fn set_prev(&mut self, block: usize, link: Link) {
        self.set_word(block + PREV_WORD, link.to_word());
    }

    /// Header offset of the right neighbour.
    fn right_of(&self, block: usize) -> usize {
        block + self.size(block)
    }

    /// State of the left neighbour, read from the footer in front of `block`.
    fn left_state(&self, block: usize) -> Option<BlockState> {
        self.footer_state(block - FOOTER_SIZE)
    }

    /// Header offset of the left neighbour. Only meaningful when the left
    /// neighbour is a real block, not a fencepost.
    fn left_of(&self, block: usize) -> usize {
        block - self.footer_size(block - FOOTER_SIZE)
    }

    /// Writes a footer-only fencepost ending at `offset + FOOTER_SIZE`.
    fn write_leading_fencepost(&mut self, offset: usize) {
        self.set_word(offset + SIZE_WORD, FENCEPOST_SIZE as u64);
        self.set_word(offset + STATE_WORD, BlockState::Sentinel.to_word());
    }

    /// Writes a header-only fencepost at `offset`.
    fn write_trailing_fencepost(&mut self, offset: usize) {
        self.set_word(offset + SIZE_WORD, FENCEPOST_SIZE as u64);
        self.set_word(offset + STATE_WORD, BlockState::Sentinel.to_word());
        self.set_word(offset + NEXT_WORD, SENTINEL_LINK);
        self.set_word(offset + PREV_WORD, SENTINEL_LINK);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Flat word store used by engine unit tests.
    pub(crate) struct VecStore(pub Vec<u64>);

    impl VecStore {
        pub(crate) fn with_bytes(len: usize) -> Self {
            Self(vec![0; len / 8])
        }
    }

    impl TagStore for VecStore {
        fn word(&self, offset: usize) -> u64 {
            self.0[offset / 8]
        }

        fn set_word(&mut self, offset: usize, value: u64) {
            self.0[offset / 8] = value;
        }
    }

    #[test]
    fn rounding_covers_overhead_and_alignment() {
        assert_eq!(rounded_block_size(0), Some(48));
        assert_eq!(rounded_block_size(1), Some(56));
        assert_eq!(rounded_block_size(8), Some(56));
        assert_eq!(rounded_block_size(9), Some(64));
        assert_eq!(rounded_block_size(usize::MAX - 10), None);
        assert_eq!(align8(usize::MAX), None);
    }

    #[test]
    fn header_and_footer_agree_after_write() {
        let mut store = VecStore::with_bytes(256);
        store.write_tags(16, 96, BlockState::Free);
        assert_eq!(store.size(16), 96);
        assert_eq!(store.state(16), Some(BlockState::Free));
        let footer = store.footer_of(16);
        assert_eq!(footer, 96);
        assert_eq!(store.footer_size(footer), 96);
        assert_eq!(store.footer_state(footer), Some(BlockState::Free));

        store.set_state(16, BlockState::Allocated);
        assert_eq!(store.footer_state(footer), Some(BlockState::Allocated));
    }

    #[test]
    fn neighbours_are_found_through_tags() {
        let mut store = VecStore::with_bytes(512);
        store.write_leading_fencepost(0);
        store.write_tags(16, 64, BlockState::Allocated);
        store.write_tags(80, 128, BlockState::Free);
        store.write_trailing_fencepost(208);

        assert_eq!(store.left_state(16), Some(BlockState::Sentinel));
        assert_eq!(store.left_state(80), Some(BlockState::Allocated));
        assert_eq!(store.left_of(80), 16);
        assert_eq!(store.right_of(16), 80);
        assert_eq!(store.right_of(80), 208);
        assert_eq!(store.state(208), Some(BlockState::Sentinel));
        assert_eq!(store.size(208), FENCEPOST_SIZE);
    }

    #[test]
    fn links_round_trip_sentinel() {
        let mut store = VecStore::with_bytes(64);
        store.set_next(0, Link::Sentinel);
        store.set_prev(0, Link::Block(4096));
        assert_eq!(store.next(0), Link::Sentinel);
        assert_eq!(store.prev(0), Link::Block(4096));
        assert_eq!(BlockState::from_word(7), None);
    }
}
