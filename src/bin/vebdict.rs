// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! vebdict benchmark harness.
//!
//! Builds a dictionary from permuted random keys, then runs a search
//! workload, reporting one whitespace-separated line per size step:
//!
//! ```text
//! log2(N) search_seconds insert_seconds cycles misses
//! ```
//!
//! Cycles and last-level-cache misses come from the kernel performance
//! monitoring interface on Linux; both columns are zero when the PMU is
//! unavailable (unprivileged containers) or on other platforms.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;
use vebdict::{Backing, Dictionary, VebTree};

#[derive(Parser)]
#[command(name = "vebdict")]
#[command(version = "0.1.0")]
#[command(about = "Cache-oblivious dictionary benchmark", long_about = None)]
struct Cli {
    /// Measure the insert phase (default: both phases)
    #[arg(short = 'i')]
    insert: bool,

    /// Measure the search phase (default: both phases)
    #[arg(short = 's')]
    search: bool,

    /// Fix the key count instead of sweeping powers of two
    #[arg(short = 'k')]
    keys: Option<u64>,

    /// Dictionary form under test
    #[arg(long, value_enum, default_value_t = Mode::Pma)]
    mode: Mode,

    /// Back the tree-form element region with this file
    #[arg(long)]
    backing: Option<PathBuf>,

    /// Searches per size step
    #[arg(long, default_value_t = 10_000)]
    trials: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Packed memory array with vEB index
    Pma,
    /// Standalone vEB tree
    Tree,
}

#[cfg(target_os = "linux")]
mod counters {
    use perf_event::events::{Cache, CacheOp, CacheResult, Hardware, WhichCache};
    use perf_event::{Builder, Counter};

    /// Cycle and last-level-cache-miss counters over one workload phase.
    pub struct Counters {
        cycles: Counter,
        misses: Counter,
    }

    impl Counters {
        pub fn start() -> Option<Counters> {
            let llc_read_miss = Cache {
                which: WhichCache::LL,
                operation: CacheOp::READ,
                result: CacheResult::MISS,
            };
            let mut cycles = Builder::new().kind(Hardware::CPU_CYCLES).build().ok()?;
            let mut misses = Builder::new().kind(llc_read_miss).build().ok()?;
            cycles.enable().ok()?;
            misses.enable().ok()?;
            Some(Counters { cycles, misses })
        }

        pub fn stop(mut self) -> (u64, u64) {
            let _ = self.cycles.disable();
            let _ = self.misses.disable();
            (
                self.cycles.read().unwrap_or(0),
                self.misses.read().unwrap_or(0),
            )
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod counters {
    pub struct Counters;

    impl Counters {
        pub fn start() -> Option<Counters> {
            None
        }

        pub fn stop(self) -> (u64, u64) {
            (0, 0)
        }
    }
}

/// Write through two large buffers to evict the dictionary from cache
/// before the measured search phase.
fn flush_cache() {
    const FLUSH_BYTES: usize = 100 * 1024 * 1024;
    let src = vec![1u8; FLUSH_BYTES];
    let mut dst = vec![0u8; FLUSH_BYTES];
    dst.copy_from_slice(&src);
    std::hint::black_box(&dst);
}

fn generate_keys(nkeys: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(10);
    (0..nkeys).map(|_| rng.gen_range(0..u32::MAX)).collect()
}

fn permute(keys: &mut [u32]) {
    let mut rng = StdRng::seed_from_u64(100);
    keys.shuffle(&mut rng);
}

struct StepReport {
    insert_seconds: f64,
    search_seconds: f64,
    cycles: u64,
    misses: u64,
}

fn run_pma(cli: &Cli, keys: &mut [u32], do_search: bool) -> anyhow::Result<StepReport> {
    let mut dict =
        Dictionary::<u32, ()>::new(keys.len()).context("constructing the dictionary")?;

    let started = Instant::now();
    for &key in keys.iter() {
        dict.insert(key, ()).context("inserting a key")?;
    }
    let insert_seconds = started.elapsed().as_secs_f64();

    if !do_search {
        return Ok(StepReport {
            insert_seconds,
            search_seconds: 0.0,
            cycles: 0,
            misses: 0,
        });
    }

    permute(keys);
    flush_cache();

    let counters = counters::Counters::start();
    let started = Instant::now();
    for i in 0..cli.trials {
        let key = keys[(i % keys.len() as u64) as usize];
        let (pos, found) = dict.search(key);
        if !found || dict.slot(pos).key() != key {
            eprintln!("could not recover {}", key);
        }
    }
    let search_seconds = started.elapsed().as_secs_f64();
    let (cycles, misses) = counters.map(|c| c.stop()).unwrap_or((0, 0));

    Ok(StepReport {
        insert_seconds,
        search_seconds,
        cycles,
        misses,
    })
}

fn run_tree(cli: &Cli, keys: &mut [u32], do_search: bool) -> anyhow::Result<StepReport> {
    let capacity = (keys.len() / 4).max(1);
    let mut tree = match &cli.backing {
        Some(path) => VebTree::<u32>::with_backing(capacity, Backing::File(path.clone()))
            .context("constructing the file-backed tree")?,
        None => VebTree::<u32>::new(capacity).context("constructing the tree")?,
    };

    let started = Instant::now();
    for &key in keys.iter() {
        tree.insert(key).context("inserting a key")?;
    }
    let insert_seconds = started.elapsed().as_secs_f64();

    if !do_search {
        return Ok(StepReport {
            insert_seconds,
            search_seconds: 0.0,
            cycles: 0,
            misses: 0,
        });
    }

    permute(keys);
    flush_cache();

    let counters = counters::Counters::start();
    let started = Instant::now();
    for i in 0..cli.trials {
        let key = keys[(i % keys.len() as u64) as usize];
        if !tree.contains(key) {
            eprintln!("could not recover {}", key);
        }
    }
    let search_seconds = started.elapsed().as_secs_f64();
    let (cycles, misses) = counters.map(|c| c.stop()).unwrap_or((0, 0));

    Ok(StepReport {
        insert_seconds,
        search_seconds,
        cycles,
        misses,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Absent both flags, measure both phases. Searching requires the
    // insert phase to have run; only its timing column is suppressed.
    let (report_insert, do_search) = match (cli.insert, cli.search) {
        (false, false) => (true, true),
        (i, s) => (i, s),
    };

    let sizes: Vec<u64> = match cli.keys {
        Some(k) => vec![k.max(1)],
        None => (8..=20).map(|p| 1u64 << p).collect(),
    };

    for nkeys in sizes {
        eprintln!("{} keys", nkeys);
        let mut keys = generate_keys(nkeys);

        let report = match cli.mode {
            Mode::Pma => run_pma(&cli, &mut keys, do_search)?,
            Mode::Tree => run_tree(&cli, &mut keys, do_search)?,
        };

        println!(
            "{} {:.6} {:.6} {} {}",
            vebdict::layout::ilog2(nkeys),
            report.search_seconds,
            if report_insert { report.insert_seconds } else { 0.0 },
            report.cycles,
            report.misses
        );
    }

    Ok(())
}
