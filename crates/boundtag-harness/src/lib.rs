//! Stress and scenario harness for the boundtag allocator.
//!
//! This crate provides:
//! - Scenario suite: the reference reuse, growth, realloc, calloc, and
//!   coalescing cases, each checked against a full heap verification
//! - Stress runner: N threads x M randomized malloc/realloc/free cycles on one
//!   shared heap, followed by a single-threaded heap walk
//! - Structured logs: JSONL run records, including the allocator's own
//!   lifecycle records

#![forbid(unsafe_code)]

pub mod error;
pub mod rng;
pub mod scenarios;
pub mod stress;
pub mod structured_log;

pub use error::HarnessError;
pub use scenarios::{ScenarioReport, run_scenarios};
pub use stress::{StressConfig, StressReport, run_stress};
