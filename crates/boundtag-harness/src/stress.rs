//! Multi-threaded stress runner.
//!
//! Every worker drives its own randomized malloc/calloc/realloc/free sequence
//! against one shared allocator and checks that no live payload is disturbed.
//! After all workers join, the heap is walked once from a single thread.

use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use boundtag_core::malloc::{HeapCheck, HeapStats};
use boundtag_core::{Allocator, AllocatorConfig, BufferSource};
use serde::Serialize;

use crate::error::HarnessError;
use crate::rng::XorShift64;

/// Shape of one stress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressConfig {
    pub threads: usize,
    pub ops_per_thread: usize,
    /// Largest request size; sizes are drawn from `0..=max_size`.
    pub max_size: usize,
    pub seed: u64,
    pub arena_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            ops_per_thread: 2000,
            max_size: 1024,
            seed: 0x5EED_B10C_0000_0001,
            arena_size: AllocatorConfig::DEFAULT.arena_size,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerTally {
    pub mallocs: u64,
    pub callocs: u64,
    pub reallocs: u64,
    pub frees: u64,
    pub peak_live: usize,
}

impl WorkerTally {
    fn ops(&self) -> u64 {
        self.mallocs + self.callocs + self.reallocs + self.frees
    }
}

/// Outcome of a completed stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub config: StressConfig,
    pub ops: u64,
    pub elapsed_ms: u64,
    pub workers: Vec<WorkerTally>,
    pub stats: HeapStats,
    pub check: HeapCheck,
}

struct Live {
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
}

/// Runs `config.threads` workers against one heap and verifies the result.
pub fn run_stress(config: &StressConfig) -> Result<StressReport, HarnessError> {
    if config.threads == 0 {
        return Err(HarnessError::InvalidArgument("threads must be > 0".into()));
    }
    if config.ops_per_thread == 0 {
        return Err(HarnessError::InvalidArgument("ops must be > 0".into()));
    }

    let alloc = Arc::new(Allocator::with_config(
        BufferSource::new(),
        AllocatorConfig::DEFAULT
            .with_arena_size(config.arena_size)
            .with_verbose(false),
    ));
    let started = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|index| {
            let alloc = Arc::clone(&alloc);
            let config = *config;
            thread::spawn(move || worker(&alloc, &config, index))
        })
        .collect();

    let mut workers = Vec::with_capacity(config.threads);
    for (index, handle) in handles.into_iter().enumerate() {
        let tally = handle
            .join()
            .map_err(|_| HarnessError::WorkerPanicked(index))??;
        workers.push(tally);
    }
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let check = alloc.verify()?;
    if check.allocated_blocks != 0 {
        return Err(HarnessError::Expectation {
            case: "stress".into(),
            detail: format!("{} blocks still allocated after join", check.allocated_blocks),
        });
    }
    Ok(StressReport {
        config: *config,
        ops: workers.iter().map(WorkerTally::ops).sum(),
        elapsed_ms,
        workers,
        stats: alloc.stats(),
        check,
    })
}

fn worker(
    alloc: &Allocator<BufferSource>,
    config: &StressConfig,
    index: usize,
) -> Result<WorkerTally, HarnessError> {
    let case = format!("stress worker {index}");
    let mut rng = XorShift64::fork(config.seed, index as u64);
    let mut live: Vec<Live> = Vec::new();
    let mut tally = WorkerTally::default();

    for op in 0..config.ops_per_thread {
        let roll = rng.gen_range(0, 9);
        let seed = (index.wrapping_mul(31).wrapping_add(op) % 251) as u8;
        if roll < 5 || live.is_empty() {
            let len = rng.gen_range(0, config.max_size);
            let ptr = if roll == 0 {
                tally.callocs += 1;
                let ptr = alloc.calloc(1, len)?;
                check_zeroed(&case, alloc, ptr, len)?;
                ptr
            } else {
                tally.mallocs += 1;
                alloc.malloc(len)?
            };
            fill(alloc, ptr, len, seed)?;
            live.push(Live { ptr, len, seed });
            tally.peak_live = tally.peak_live.max(live.len());
        } else if roll < 8 {
            let victim = live.swap_remove(rng.gen_range(0, live.len() - 1));
            check_pattern(&case, alloc, &victim)?;
            alloc.free(Some(victim.ptr))?;
            tally.frees += 1;
        } else {
            let slot = rng.gen_range(0, live.len() - 1);
            let len = rng.gen_range(0, config.max_size);
            let entry = &mut live[slot];
            check_pattern(&case, alloc, entry)?;
            let ptr = alloc.realloc(Some(entry.ptr), len)?;
            tally.reallocs += 1;
            let kept = Live {
                ptr,
                len: entry.len.min(len),
                seed: entry.seed,
            };
            check_pattern(&case, alloc, &kept)?;
            fill(alloc, ptr, len, seed)?;
            *entry = Live { ptr, len, seed };
        }
    }

    for entry in live.drain(..) {
        check_pattern(&case, alloc, &entry)?;
        alloc.free(Some(entry.ptr))?;
        tally.frees += 1;
    }
    Ok(tally)
}

fn fill(
    alloc: &Allocator<BufferSource>,
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
) -> Result<(), HarnessError> {
    alloc.with_payload_mut(ptr, |bytes| {
        for (i, b) in bytes[..len].iter_mut().enumerate() {
            *b = seed ^ (i as u8);
        }
    })?;
    Ok(())
}

fn check_pattern(
    case: &str,
    alloc: &Allocator<BufferSource>,
    entry: &Live,
) -> Result<(), HarnessError> {
    let mismatch = alloc.with_payload(entry.ptr, |bytes| {
        bytes[..entry.len]
            .iter()
            .enumerate()
            .position(|(i, b)| *b != entry.seed ^ (i as u8))
    })?;
    match mismatch {
        None => Ok(()),
        Some(offset) => Err(HarnessError::PatternMismatch {
            case: case.to_string(),
            offset,
        }),
    }
}

fn check_zeroed(
    case: &str,
    alloc: &Allocator<BufferSource>,
    ptr: NonNull<u8>,
    len: usize,
) -> Result<(), HarnessError> {
    let dirty = alloc.with_payload(ptr, |bytes| bytes[..len].iter().position(|&b| b != 0))?;
    match dirty {
        None => Ok(()),
        Some(offset) => Err(HarnessError::PatternMismatch {
            case: format!("{case} calloc"),
            offset,
        }),
    }
}
