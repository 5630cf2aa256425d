//! Heap error taxonomy.

use thiserror::Error;

use crate::malloc::block::BlockState;

/// Errors surfaced by the heap engine.
///
/// Only `OutOfMemory` and `SizeOverflow` can come out of a well-formed request.
/// `ForeignPointer` and `NotAllocated` are cheap guards in front of the release
/// path; anything they do not catch is still undefined behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("out of memory: the OS source refused an arena for a {requested}-byte request")]
    OutOfMemory { requested: usize },

    #[error("size overflow computing {count} x {size} bytes")]
    SizeOverflow { count: usize, size: usize },

    /// Address (or heap offset, for offset-level calls) outside every arena.
    #[error("address {addr:#x} does not belong to this heap")]
    ForeignPointer { addr: usize },

    #[error("block at heap offset {offset:#x} is not allocated (state {state:?})")]
    NotAllocated {
        offset: usize,
        state: Option<BlockState>,
    },

    #[error("heap corrupted at offset {offset:#x}: {reason}")]
    Corrupted { offset: usize, reason: &'static str },
}

impl HeapError {
    /// Machine-readable outcome label used in lifecycle records.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "oom",
            Self::SizeOverflow { .. } => "overflow",
            Self::ForeignPointer { .. } => "foreign_pointer",
            Self::NotAllocated { .. } => "not_allocated",
            Self::Corrupted { .. } => "corrupted",
        }
    }
}
