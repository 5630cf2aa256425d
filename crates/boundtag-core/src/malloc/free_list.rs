//! Sentinel-anchored circular doubly-linked free list.
//!
//! The sentinel is not a memory block: its two links live here, and a link
//! word of [`Link::Sentinel`] in a block header points back to it. Every other
//! node is a `Free` block whose `next`/`prev` header words carry the links.

use super::block::{Link, TagStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    /// `sentinel.next`
    head: Link,
    /// `sentinel.prev`
    tail: Link,
    len: usize,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: Link::Sentinel,
            tail: Link::Sentinel,
            len: 0,
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
    pub fn head(&self) -> Link {
        self.head
    }

    #[must_use]
    pub fn tail(&self) -> Link {
        self.tail
    }

    fn next_of<T: TagStore>(&self, store: &T, node: Link) -> Link {
        match node {
            Link::Sentinel => self.head,
            Link::Block(block) => store.next(block),
        }
    }

    fn set_next_of<T: TagStore>(&mut self, store: &mut T, node: Link, next: Link) {
        match node {
            Link::Sentinel => self.head = next,
            Link::Block(block) => store.set_next(block, next),
        }
    }

    fn set_prev_of<T: TagStore>(&mut self, store: &mut T, node: Link, prev: Link) {
        match node {
            Link::Sentinel => self.tail = prev,
            Link::Block(block) => store.set_prev(block, prev),
        }
    }

    /// Splices `block` in right after `node`.
    pub fn insert_after<T: TagStore>(&mut self, store: &mut T, node: Link, block: usize) {
        let next = self.next_of(store, node);
        store.set_prev(block, node);
        store.set_next(block, next);
        self.set_prev_of(store, next, Link::Block(block));
        self.set_next_of(store, node, Link::Block(block));
        self.len += 1;
    }

    pub fn push_front<T: TagStore>(&mut self, store: &mut T, block: usize) {
        self.insert_after(store, Link::Sentinel, block);
    }

    pub fn push_back<T: TagStore>(&mut self, store: &mut T, block: usize) {
        self.insert_after(store, self.tail, block);
    }

    /// Unlinks `block` using its own link words.
    pub fn remove<T: TagStore>(&mut self, store: &mut T, block: usize) {
        let prev = store.prev(block);
        let next = store.next(block);
        self.set_next_of(store, prev, next);
        self.set_prev_of(store, next, prev);
        self.len -= 1;
    }

    /// Puts `new` in `old`'s list position. `old` is no longer on the list.
    pub fn replace<T: TagStore>(&mut self, store: &mut T, old: usize, new: usize) {
        let prev = store.prev(old);
        let next = store.next(old);
        store.set_prev(new, prev);
        store.set_next(new, next);
        self.set_next_of(store, prev, Link::Block(new));
        self.set_prev_of(store, next, Link::Block(new));
    }

    /// First block in list order whose size is at least `size`.
    pub fn find_first_fit<T: TagStore>(&self, store: &T, size: usize) -> Option<usize> {
        self.iter(store).find(|&block| store.size(block) >= size)
    }

    /// Last node in list order whose offset is below `offset`, or the
    /// sentinel when there is none.
    pub fn last_below<T: TagStore>(&self, store: &T, offset: usize) -> Link {
        self.iter(store)
            .filter(|&block| block < offset)
            .last()
            .map_or(Link::Sentinel, Link::Block)
    }

    /// Walks from `sentinel.next` until the sentinel. The walk is bounded by
    /// the recorded length so a corrupted cycle cannot spin forever.
    pub fn iter<'a, T: TagStore>(&self, store: &'a T) -> FreeListIter<'a, T> {
        FreeListIter {
            store,
            cursor: self.head,
            remaining: self.len,
        }
    }
}

pub struct FreeListIter<'a, T> {
    store: &'a T,
    cursor: Link,
    remaining: usize,
}

impl<T: TagStore> Iterator for FreeListIter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let block = self.cursor.block()?;
        self.cursor = self.store.next(block);
        self.remaining -= 1;
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::block::BlockState;
    use crate::malloc::block::tests::VecStore;

    /// Store with free blocks of 64 bytes at 0, 64, 128, ...
    fn store_with_blocks(count: usize) -> (VecStore, Vec<usize>) {
        let mut store = VecStore::with_bytes(64 * count);
        let blocks: Vec<usize> = (0..count).map(|i| i * 64).collect();
        for &b in &blocks {
            store.write_tags(b, 64, BlockState::Free);
        }
        (store, blocks)
    }

    fn order(list: &FreeList, store: &VecStore) -> Vec<usize> {
        list.iter(store).collect()
    }

    #[test]
    fn insert_and_remove_keep_links_consistent() {
        let (mut store, b) = store_with_blocks(4);
        let mut list = FreeList::new();
        list.push_back(&mut store, b[0]);
        list.push_back(&mut store, b[1]);
        list.push_front(&mut store, b[2]);
        assert_eq!(order(&list, &store), vec![b[2], b[0], b[1]]);
        assert_eq!(store.prev(b[2]), Link::Sentinel);
        assert_eq!(store.next(b[1]), Link::Sentinel);

        list.remove(&mut store, b[0]);
        assert_eq!(order(&list, &store), vec![b[2], b[1]]);
        assert_eq!(store.next(b[2]), Link::Block(b[1]));
        assert_eq!(store.prev(b[1]), Link::Block(b[2]));

        list.remove(&mut store, b[2]);
        list.remove(&mut store, b[1]);
        assert!(list.is_empty());
        assert_eq!(list.head(), Link::Sentinel);
    }

    #[test]
    fn replace_takes_over_position() {
        let (mut store, b) = store_with_blocks(4);
        let mut list = FreeList::new();
        for &block in &b[..3] {
            list.push_back(&mut store, block);
        }
        list.replace(&mut store, b[1], b[3]);
        assert_eq!(order(&list, &store), vec![b[0], b[3], b[2]]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn first_fit_returns_first_large_enough_block() {
        let mut store = VecStore::with_bytes(1024);
        store.write_tags(0, 64, BlockState::Free);
        store.write_tags(64, 256, BlockState::Free);
        store.write_tags(320, 512, BlockState::Free);
        let mut list = FreeList::new();
        list.push_back(&mut store, 0);
        list.push_back(&mut store, 320);
        list.push_back(&mut store, 64);

        assert_eq!(list.find_first_fit(&store, 64), Some(0));
        assert_eq!(list.find_first_fit(&store, 200), Some(320));
        assert_eq!(list.find_first_fit(&store, 600), None);
    }

    #[test]
    fn last_below_picks_last_lower_node_in_list_order() {
        let (mut store, b) = store_with_blocks(6);
        let mut list = FreeList::new();
        list.push_back(&mut store, b[1]);
        list.push_back(&mut store, b[4]);
        list.push_back(&mut store, b[2]);
        assert_eq!(list.last_below(&store, b[3]), Link::Block(b[2]));
        assert_eq!(list.last_below(&store, b[0]), Link::Sentinel);
        assert_eq!(list.last_below(&store, b[5]), Link::Block(b[2]));
    }
}
