//! # Fuzz Runner
//!
//! Walks the Pig demo title with the fuzz driver, one seeded run per seed,
//! and writes an artifact for every crash.
//!
//! Run with: `cargo run --example fuzz_runner -- --seeds 500`
//!
//! `--cheat` turns on rerollable dice, which the driver reports as bad undos:
//!
//! ```text
//! cargo run --example fuzz_runner -- --cheat --crash-dir target/crashes
//! ```
//!
//! The `MAX_STEPS`, `TIMEOUT`, `MAX_ERRORS` and `CRASH_DIR` environment
//! variables set the defaults; flags override them.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::disallowed_macros,
    clippy::expect_used
)]

mod pig;

use std::path::PathBuf;

use clap::Parser;
use fortress_turns::{FuzzConfig, FuzzDriver, TurnsError};
use pig::Pig;

#[derive(Parser)]
struct Opt {
    /// Number of runs.
    #[arg(short, long, default_value_t = 1000)]
    seeds: u64,
    /// First seed.
    #[arg(long, default_value_t = 1)]
    start: u64,
    /// Accepted actions per run.
    #[arg(long)]
    max_steps: Option<usize>,
    /// Crashes before giving up.
    #[arg(long)]
    max_errors: Option<usize>,
    /// Where crash artifacts go.
    #[arg(long)]
    crash_dir: Option<PathBuf>,
    /// Allow rerolling dice.
    #[arg(long)]
    cheat: bool,
    /// Log every run.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if opt.verbose {
                tracing::Level::TRACE
            } else {
                tracing::Level::WARN
            })
            .finish(),
    )
    .expect("setting up tracing subscriber failed");

    let mut config = FuzzConfig::from_env()?;
    if let Some(max_steps) = opt.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(max_errors) = opt.max_errors {
        config.max_errors = max_errors;
    }
    if let Some(dir) = opt.crash_dir {
        config = config.with_crash_dir(dir);
    }
    let mut driver = FuzzDriver::new(config)?;
    let rules = Pig { cheat: opt.cheat };

    let seeds = opt.start..opt.start.saturating_add(opt.seeds);
    let mut crashes = Vec::new();
    let mut aborted = false;
    for seed in seeds {
        match driver.run_seeded(&rules, seed) {
            Ok(Some(report)) => crashes.push((seed, report)),
            Ok(None) => {},
            Err(err @ TurnsError::FuzzAborted { .. }) => {
                eprintln!("{err}");
                aborted = true;
                break;
            },
            Err(err) => return Err(err.into()),
        }
    }

    println!("{} runs, {} crashes", driver.runs(), crashes.len());
    for (seed, report) in &crashes {
        let location = report
            .path
            .as_ref()
            .map_or_else(|| "not written".to_owned(), |p| p.display().to_string());
        println!(
            "  seed {seed}: {} after {} steps ({location})",
            report.violation, report.steps
        );
    }
    if aborted || !crashes.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
