//! Deterministic allocator scenarios.
//!
//! Each case runs on a private heap, checks its own expectations, then walks
//! the whole heap with [`Allocator::verify`]. The coalescing cases pin one
//! release path each: right merge, left merge, merge on both sides, and an
//! isolated release that lands in address order.

use std::ptr::NonNull;
use std::time::Instant;

use boundtag_core::malloc::arena::ARENA_OVERHEAD;
use boundtag_core::malloc::{AllocatorLogRecord, BlockState, HeapCheck};
use boundtag_core::{Allocator, AllocatorConfig, BufferSource};
use serde::Serialize;

use crate::error::HarnessError;
use crate::structured_log::Outcome;

type CaseFn = fn(&Allocator<BufferSource>) -> Result<(), HarnessError>;

const CASES: &[(&str, CaseFn)] = &[
    ("reuse_after_free", reuse_after_free),
    ("arena_growth", arena_growth),
    ("realloc_shrink_prefix", realloc_shrink_prefix),
    ("calloc_zeroed", calloc_zeroed),
    ("coalesce_right", coalesce_right),
    ("coalesce_left", coalesce_left),
    ("coalesce_both", coalesce_both),
    ("address_ordered_insert", address_ordered_insert),
];

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<HeapCheck>,
    pub duration_us: u64,
    #[serde(skip)]
    pub lifecycle: Vec<AllocatorLogRecord>,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Names of every scenario, in run order.
#[must_use]
pub fn scenario_names() -> Vec<&'static str> {
    CASES.iter().map(|(name, _)| *name).collect()
}

/// Runs every scenario, each on a fresh heap built from `config`.
#[must_use]
pub fn run_scenarios(config: AllocatorConfig) -> Vec<ScenarioReport> {
    CASES
        .iter()
        .map(|&(name, case)| run_case(name, case, config))
        .collect()
}

fn run_case(name: &'static str, case: CaseFn, config: AllocatorConfig) -> ScenarioReport {
    let alloc = Box::new(Allocator::with_config(BufferSource::new(), config));
    let started = Instant::now();
    let result = case(&alloc).and_then(|()| alloc.verify().map_err(HarnessError::from));
    let duration_us = started.elapsed().as_micros() as u64;

    let (outcome, detail, check) = match result {
        Ok(check) => (Outcome::Pass, None, Some(check)),
        Err(
            err @ (HarnessError::Expectation { .. } | HarnessError::PatternMismatch { .. }),
        ) => (Outcome::Fail, Some(err.to_string()), None),
        Err(err) => (Outcome::Error, Some(err.to_string()), None),
    };
    ScenarioReport {
        name,
        outcome,
        detail,
        check,
        duration_us,
        lifecycle: alloc.drain_lifecycle_logs(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn expect(case: &str, cond: bool, detail: impl FnOnce() -> String) -> Result<(), HarnessError> {
    if cond {
        Ok(())
    } else {
        Err(HarnessError::Expectation {
            case: case.to_string(),
            detail: detail(),
        })
    }
}

fn fill(
    alloc: &Allocator<BufferSource>,
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
) -> Result<(), HarnessError> {
    alloc.with_payload_mut(ptr, |bytes| {
        for (i, b) in bytes[..len].iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }
    })?;
    Ok(())
}

fn check_pattern(
    case: &str,
    alloc: &Allocator<BufferSource>,
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
) -> Result<(), HarnessError> {
    let mismatch = alloc.with_payload(ptr, |bytes| {
        bytes[..len]
            .iter()
            .enumerate()
            .position(|(i, b)| *b != seed.wrapping_add(i as u8))
    })?;
    match mismatch {
        None => Ok(()),
        Some(offset) => Err(HarnessError::PatternMismatch {
            case: case.to_string(),
            offset,
        }),
    }
}

/// Allocates `n` blocks of `size` bytes and returns them with their header
/// offsets, in allocation order.
fn carve(
    alloc: &Allocator<BufferSource>,
    n: usize,
    size: usize,
) -> Result<Vec<(NonNull<u8>, usize, usize)>, HarnessError> {
    let ptrs = (0..n)
        .map(|_| alloc.malloc(size))
        .collect::<Result<Vec<_>, _>>()?;
    let allocated: Vec<_> = alloc
        .walk()
        .into_iter()
        .filter(|b| b.state == BlockState::Allocated)
        .collect();
    // A fresh heap hands out blocks front to back, so walk order matches.
    Ok(ptrs
        .into_iter()
        .zip(allocated)
        .map(|(ptr, info)| (ptr, info.offset, info.size))
        .collect())
}

fn free_block_at(alloc: &Allocator<BufferSource>, offset: usize) -> Option<usize> {
    alloc
        .walk()
        .into_iter()
        .find(|b| b.offset == offset && b.state == BlockState::Free)
        .map(|b| b.size)
}

// ---------------------------------------------------------------------------
// Cases
// ---------------------------------------------------------------------------

fn reuse_after_free(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let p = alloc.malloc(100)?;
    alloc.free(Some(p))?;
    let q = alloc.malloc(100)?;
    expect("reuse_after_free", p == q, || {
        format!("freed block {p:p} not reused, got {q:p}")
    })?;
    let arenas = alloc.stats().arenas;
    expect("reuse_after_free", arenas == 1, || {
        format!("expected one arena, found {arenas}")
    })
}

fn arena_growth(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let arena_size = alloc.config().arena_size;
    let big = arena_size / 4 * 3;
    alloc.malloc(big)?;
    alloc.malloc(big)?;
    let stats = alloc.stats();
    let expected = 2 * (arena_size + ARENA_OVERHEAD);
    expect("arena_growth", stats.arenas == 2, || {
        format!("expected two arenas, found {}", stats.arenas)
    })?;
    expect("arena_growth", stats.heap_size == expected, || {
        format!("heap size {} != {expected}", stats.heap_size)
    })
}

fn realloc_shrink_prefix(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let p = alloc.malloc(64)?;
    fill(alloc, p, 64, 0x40)?;
    let q = alloc.realloc(Some(p), 16)?;
    check_pattern("realloc_shrink_prefix", alloc, q, 16, 0x40)?;
    alloc.free(Some(q))?;
    Ok(())
}

fn calloc_zeroed(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let dirty = alloc.malloc(40)?;
    fill(alloc, dirty, 40, 0xAA)?;
    alloc.free(Some(dirty))?;

    let p = alloc.calloc(10, 4)?;
    let zeroed = alloc.with_payload(p, |bytes| bytes.iter().all(|&b| b == 0))?;
    expect("calloc_zeroed", zeroed, || "reused block not cleared".to_string())?;
    let callocs = alloc.stats().callocs;
    expect("calloc_zeroed", callocs == 1, || {
        format!("calloc counted {callocs} times")
    })
}

fn coalesce_right(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let blocks = carve(alloc, 3, 64)?;
    let [(a, a_off, a_size), (b, _, b_size), _guard] = blocks[..] else {
        return Err(short_carve("coalesce_right"));
    };
    alloc.free(Some(b))?;
    alloc.free(Some(a))?;
    let merged = free_block_at(alloc, a_off);
    expect("coalesce_right", merged == Some(a_size + b_size), || {
        format!("block at {a_off} is {merged:?}, expected {}", a_size + b_size)
    })
}

fn coalesce_left(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let blocks = carve(alloc, 3, 64)?;
    let [(a, a_off, a_size), (b, _, b_size), _guard] = blocks[..] else {
        return Err(short_carve("coalesce_left"));
    };
    let before = alloc.free_list().len();
    alloc.free(Some(a))?;
    alloc.free(Some(b))?;
    let merged = free_block_at(alloc, a_off);
    expect("coalesce_left", merged == Some(a_size + b_size), || {
        format!("block at {a_off} is {merged:?}, expected {}", a_size + b_size)
    })?;
    let after = alloc.free_list().len();
    expect("coalesce_left", after == before + 1, || {
        format!("free list grew from {before} to {after}")
    })
}

fn coalesce_both(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let blocks = carve(alloc, 4, 64)?;
    let [(a, a_off, a_size), (b, _, b_size), (c, _, c_size), _guard] = blocks[..] else {
        return Err(short_carve("coalesce_both"));
    };
    alloc.free(Some(a))?;
    alloc.free(Some(c))?;
    let before = alloc.free_list().len();
    alloc.free(Some(b))?;
    let total = a_size + b_size + c_size;
    let merged = free_block_at(alloc, a_off);
    expect("coalesce_both", merged == Some(total), || {
        format!("block at {a_off} is {merged:?}, expected {total}")
    })?;
    let after = alloc.free_list().len();
    expect("coalesce_both", after + 1 == before, || {
        format!("free list went from {before} to {after}")
    })
}

fn address_ordered_insert(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
    let blocks = carve(alloc, 5, 64)?;
    let [_, (b, b_off, _), _, (d, d_off, _), _] = blocks[..] else {
        return Err(short_carve("address_ordered_insert"));
    };
    alloc.free(Some(b))?;
    alloc.free(Some(d))?;
    let order: Vec<usize> = alloc.free_list().iter().map(|f| f.offset).collect();
    let b_pos = order.iter().position(|&o| o == b_off);
    let d_pos = order.iter().position(|&o| o == d_off);
    expect(
        "address_ordered_insert",
        matches!((b_pos, d_pos), (Some(x), Some(y)) if x < y),
        || format!("free list order {order:?} does not place {b_off} before {d_off}"),
    )
}

fn short_carve(case: &str) -> HarnessError {
    HarnessError::Expectation {
        case: case.to_string(),
        detail: "heap walk returned fewer blocks than allocated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_passes_on_small_arenas() {
        let reports = run_scenarios(AllocatorConfig::DEFAULT.with_arena_size(4096));
        assert_eq!(reports.len(), scenario_names().len());
        for report in &reports {
            assert!(report.passed(), "{}: {:?}", report.name, report.detail);
            assert!(report.check.is_some());
        }
    }

    #[test]
    fn expectation_failures_are_reported_as_fail() {
        fn always_fails(_: &Allocator<BufferSource>) -> Result<(), HarnessError> {
            expect("always_fails", false, || "forced".to_string())
        }
        let report = run_case("always_fails", always_fails, AllocatorConfig::DEFAULT);
        assert_eq!(report.outcome, Outcome::Fail);
        assert_eq!(report.detail.as_deref(), Some("always_fails: forced"));
    }

    #[test]
    fn heap_errors_are_reported_as_error() {
        fn bad_free(alloc: &Allocator<BufferSource>) -> Result<(), HarnessError> {
            let p = alloc.malloc(8)?;
            alloc.free(Some(p))?;
            alloc.free(Some(p))?;
            Ok(())
        }
        let report = run_case("bad_free", bad_free, AllocatorConfig::DEFAULT);
        assert_eq!(report.outcome, Outcome::Error);
        assert!(report.detail.unwrap().starts_with("heap:"));
    }

    #[test]
    fn growth_scenario_records_arena_growth() {
        let reports = run_scenarios(
            AllocatorConfig::DEFAULT
                .with_arena_size(4096)
                .with_log_level(Some(boundtag_core::malloc::AllocatorLogLevel::Debug)),
        );
        let growth = reports
            .iter()
            .find(|r| r.name == "arena_growth")
            .expect("growth scenario present");
        let grows = growth
            .lifecycle
            .iter()
            .filter(|r| r.event == "arena_grow")
            .count();
        assert_eq!(grows, 2);
    }
}
