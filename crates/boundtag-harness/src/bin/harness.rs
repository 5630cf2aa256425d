//! CLI entrypoint for the boundtag stress and scenario harness.

use std::path::{Path, PathBuf};

use boundtag_core::AllocatorConfig;
use boundtag_core::malloc::AllocatorLogLevel;
use boundtag_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use boundtag_harness::{HarnessError, StressConfig, run_scenarios, run_stress};
use clap::{Parser, Subcommand};

/// Exercise tooling for the boundtag allocator.
#[derive(Debug, Parser)]
#[command(name = "boundtag-harness")]
#[command(about = "Stress and scenario harness for the boundtag allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Hammer one shared heap from several threads, then verify it.
    Stress {
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Operations per thread.
        #[arg(long, default_value_t = 2000)]
        ops: usize,
        /// Largest request size in bytes.
        #[arg(long, default_value_t = 1024)]
        max_size: usize,
        /// Root seed, decimal or 0x-prefixed hex.
        #[arg(long, value_parser = parse_u64, default_value = "0x5EEDB10C00000001")]
        seed: u64,
        /// Arena payload capacity; defaults to the environment setting.
        #[arg(long)]
        arena_size: Option<usize>,
        /// JSONL output path (if omitted, prints to stdout).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Run the deterministic allocation scenarios.
    Scenarios {
        #[arg(long)]
        arena_size: Option<usize>,
        /// Include allocator lifecycle records in the log.
        #[arg(long)]
        lifecycle: bool,
        /// JSONL output path (if omitted, prints to stdout).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Print the configuration resolved from the environment as JSON.
    Config,
}

fn parse_u64(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid seed {raw:?}: {err}"))
}

fn emitter(log: Option<&Path>, run_id: &str) -> std::io::Result<LogEmitter> {
    match log {
        Some(path) => LogEmitter::to_file(path, run_id),
        None => Ok(LogEmitter::to_stdout(run_id)),
    }
}

fn run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{secs}-{}", std::process::id())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Stress {
            threads,
            ops,
            max_size,
            seed,
            arena_size,
            log,
        } => {
            let config = StressConfig {
                threads,
                ops_per_thread: ops,
                max_size,
                seed,
                arena_size: arena_size.unwrap_or(AllocatorConfig::from_env().arena_size),
            };
            eprintln!(
                "Stress: {threads} threads x {ops} ops, sizes 0..={max_size}, seed {seed:#x}"
            );
            let mut out = emitter(log.as_deref(), &run_id())?;
            out.emit_entry(
                LogEntry::new(String::new(), LogLevel::Info, "stress_start")
                    .with_suite("stress")
                    .with_details(serde_json::to_value(config)?),
            )?;
            let result = run_stress(&config);
            let entry = match &result {
                Ok(report) => LogEntry::new(String::new(), LogLevel::Info, "stress_end")
                    .with_outcome(Outcome::Pass)
                    .with_duration_ms(report.elapsed_ms)
                    .with_details(serde_json::to_value(report)?),
                Err(err) => LogEntry::new(String::new(), LogLevel::Error, "stress_end")
                    .with_outcome(match err {
                        HarnessError::PatternMismatch { .. } | HarnessError::Expectation { .. } => {
                            Outcome::Fail
                        }
                        _ => Outcome::Error,
                    })
                    .with_details(serde_json::json!({ "error": err.to_string() })),
            };
            out.emit_entry(entry.with_suite("stress"))?;
            out.flush()?;

            let report = result?;
            eprintln!(
                "Stress passed: {} ops in {} ms, heap {} bytes over {} arenas",
                report.ops, report.elapsed_ms, report.stats.heap_size, report.stats.arenas
            );
        }
        Command::Scenarios {
            arena_size,
            lifecycle,
            log,
        } => {
            let mut config = AllocatorConfig::from_env().with_verbose(false);
            if let Some(size) = arena_size {
                config = config.with_arena_size(size);
            }
            if lifecycle {
                config = config.with_log_level(Some(AllocatorLogLevel::Trace));
            }

            let mut out = emitter(log.as_deref(), &run_id())?;
            let reports = run_scenarios(config);
            let mut failed = 0usize;
            for report in &reports {
                if lifecycle {
                    for record in &report.lifecycle {
                        out.emit_entry(LogEntry::from_lifecycle(record).with_case(report.name))?;
                    }
                }
                let level = if report.passed() {
                    LogLevel::Info
                } else {
                    failed += 1;
                    LogLevel::Error
                };
                out.emit_entry(
                    LogEntry::new(String::new(), level, "scenario_end")
                        .with_suite("scenarios")
                        .with_case(report.name)
                        .with_outcome(report.outcome)
                        .with_duration_ms(report.duration_us / 1000)
                        .with_details(serde_json::to_value(report)?),
                )?;
            }
            out.flush()?;

            eprintln!(
                "Scenarios: {} passed, {failed} failed",
                reports.len() - failed
            );
            if failed > 0 {
                return Err(format!("{failed} scenario(s) failed").into());
            }
        }
        Command::Config => {
            let config = AllocatorConfig::from_env();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
