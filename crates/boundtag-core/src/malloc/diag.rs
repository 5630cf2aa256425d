//! Heap statistics, walks, and consistency checks.

use std::fmt;

use serde::Serialize;

use super::arena::{ArenaDirectory, ArenaLayout};
use super::block::{BLOCK_OVERHEAD, BlockState, FENCEPOST_SIZE, Link, TagStore};
use super::free_list::FreeList;
use crate::error::HeapError;

/// Call counters and heap growth, as printed at exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Cumulative bytes obtained from the memory source.
    pub heap_size: usize,
    pub arenas: usize,
    pub mallocs: u64,
    pub reallocs: u64,
    pub callocs: u64,
    pub frees: u64,
}

impl HeapStats {
    pub const fn new() -> Self {
        Self {
            heap_size: 0,
            arenas: 0,
            mallocs: 0,
            reallocs: 0,
            callocs: 0,
            frees: 0,
        }
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\n-------------------\n")?;
        writeln!(f, "HeapSize:\t{} bytes", self.heap_size)?;
        writeln!(f, "# mallocs:\t{}", self.mallocs)?;
        writeln!(f, "# reallocs:\t{}", self.reallocs)?;
        writeln!(f, "# callocs:\t{}", self.callocs)?;
        writeln!(f, "# frees:\t{}", self.frees)?;
        f.write_str("\n-------------------\n")
    }
}

/// Point-in-time view of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapSummary {
    pub stats: HeapStats,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free_block: usize,
}

/// One block found by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Heap offset of the header.
    pub offset: usize,
    pub size: usize,
    pub state: BlockState,
}

/// One free-list node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeBlockInfo {
    pub offset: usize,
    pub size: usize,
}

/// Result of a successful [`verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapCheck {
    pub arenas: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
}

/// `FreeList: [offset:<o>,size:<s>]->...` in traversal order.
pub struct FreeListDisplay<'a> {
    pub(crate) list: &'a FreeList,
    pub(crate) arenas: &'a ArenaDirectory,
}

impl fmt::Display for FreeListDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FreeList: ")?;
        for (i, block) in self.list.iter(self.arenas).enumerate() {
            if i > 0 {
                f.write_str("->")?;
            }
            write!(f, "[offset:{},size:{}]", block, self.arenas.size(block))?;
        }
        Ok(())
    }
}

pub(crate) fn free_blocks(list: &FreeList, arenas: &ArenaDirectory) -> Vec<FreeBlockInfo> {
    list.iter(arenas)
        .map(|offset| FreeBlockInfo {
            offset,
            size: arenas.size(offset),
        })
        .collect()
}

pub(crate) fn summary(stats: HeapStats, list: &FreeList, arenas: &ArenaDirectory) -> HeapSummary {
    let (free_bytes, largest_free_block) = list
        .iter(arenas)
        .map(|block| arenas.size(block))
        .fold((0, 0), |(sum, max), size| (sum + size, max.max(size)));
    HeapSummary {
        stats,
        free_blocks: list.len(),
        free_bytes,
        largest_free_block,
    }
}

/// Walks every real block of every arena in address order. The walk of an
/// arena stops early at the first malformed size.
pub(crate) fn walk(arenas: &ArenaDirectory) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();
    for layout in arenas.layouts() {
        let mut block = layout.first_block;
        while block < layout.trailing_fencepost {
            let size = arenas.size(block);
            let Some(state) = arenas.state(block) else {
                break;
            };
            if size < BLOCK_OVERHEAD {
                break;
            }
            blocks.push(BlockInfo {
                offset: block,
                size,
                state,
            });
            block += size;
        }
    }
    blocks
}

fn corrupted(offset: usize, reason: &'static str) -> HeapError {
    HeapError::Corrupted { offset, reason }
}

fn check_fenceposts(arenas: &ArenaDirectory, layout: ArenaLayout) -> Result<(), HeapError> {
    if arenas.footer_size(layout.start) != FENCEPOST_SIZE
        || arenas.footer_state(layout.start) != Some(BlockState::Sentinel)
    {
        return Err(corrupted(layout.start, "leading fencepost overwritten"));
    }
    if arenas.size(layout.trailing_fencepost) != FENCEPOST_SIZE
        || arenas.state(layout.trailing_fencepost) != Some(BlockState::Sentinel)
    {
        return Err(corrupted(
            layout.trailing_fencepost,
            "trailing fencepost overwritten",
        ));
    }
    Ok(())
}

/// Checks every structural invariant of the heap:
/// fenceposts intact, header/footer agreement, sizes aligned and at least
/// one block overhead, no adjacent free blocks, arenas tiled exactly, and
/// the free list containing exactly the free blocks with consistent links.
pub(crate) fn verify(list: &FreeList, arenas: &ArenaDirectory) -> Result<HeapCheck, HeapError> {
    let mut check = HeapCheck::default();
    for layout in arenas.layouts() {
        check.arenas += 1;
        check_fenceposts(arenas, layout)?;

        let mut block = layout.first_block;
        let mut prev_free = false;
        while block < layout.trailing_fencepost {
            let size = arenas.size(block);
            if size < BLOCK_OVERHEAD || size % 8 != 0 {
                return Err(corrupted(block, "block size below overhead or unaligned"));
            }
            if block + size > layout.trailing_fencepost {
                return Err(corrupted(block, "block runs past its arena"));
            }
            let state = arenas.state(block);
            let footer = arenas.footer_of(block);
            if arenas.footer_size(footer) != size || arenas.footer_state(footer) != state {
                return Err(corrupted(block, "header and footer disagree"));
            }
            match state {
                Some(BlockState::Free) => {
                    if prev_free {
                        return Err(corrupted(block, "adjacent free blocks"));
                    }
                    prev_free = true;
                    check.free_blocks += 1;
                    check.free_bytes += size;
                }
                Some(BlockState::Allocated) => {
                    prev_free = false;
                    check.allocated_blocks += 1;
                    check.allocated_bytes += size;
                }
                _ => return Err(corrupted(block, "invalid block state")),
            }
            check.blocks += 1;
            block += size;
        }
        if block != layout.trailing_fencepost {
            return Err(corrupted(block, "blocks do not tile the arena"));
        }
    }

    let mut previous = Link::Sentinel;
    let mut listed = 0usize;
    for node in list.iter(arenas) {
        if arenas.layout_of(node).is_none_or(|layout| !layout.holds_block(node)) {
            return Err(corrupted(node, "free-list node outside every arena"));
        }
        if arenas.state(node) != Some(BlockState::Free) {
            return Err(corrupted(node, "free-list node is not free"));
        }
        if arenas.prev(node) != previous {
            return Err(corrupted(node, "free-list back link mismatch"));
        }
        previous = Link::Block(node);
        listed += 1;
    }
    let end = previous.block().map_or(list.head(), |last| arenas.next(last));
    if end != Link::Sentinel || list.tail() != previous {
        return Err(corrupted(
            previous.block().unwrap_or(0),
            "free list does not close at the sentinel",
        ));
    }
    if listed != list.len() || listed != check.free_blocks {
        return Err(corrupted(0, "free-list length differs from free block count"));
    }
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_display_matches_exit_report() {
        let stats = HeapStats {
            heap_size: 2_097_248,
            arenas: 1,
            mallocs: 3,
            reallocs: 1,
            callocs: 2,
            frees: 4,
        };
        assert_eq!(
            stats.to_string(),
            "\n-------------------\nHeapSize:\t2097248 bytes\n# mallocs:\t3\n# reallocs:\t1\n# callocs:\t2\n# frees:\t4\n\n-------------------\n"
        );
    }

    #[test]
    fn stats_serialize_with_counter_names() {
        let json = serde_json::to_value(HeapStats::new()).unwrap();
        assert_eq!(json["heap_size"], 0);
        assert_eq!(json["frees"], 0);
    }
}
