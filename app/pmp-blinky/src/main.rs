// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use kern::startup::{Outcome, StopReason};
use pmp_blinky::config::Config;

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "runs the PMP blinky demo on a simulated RV32 board"
)]
struct Args {
    /// Path to the image configuration file, in TOML. Defaults to the
    /// app.toml shipped with the demo.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Overrides the number of PMP entries the unit implements.
    #[clap(long)]
    entries: Option<usize>,

    /// Overrides the PMP granularity, in bytes.
    #[clap(long)]
    granularity: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path = args.config.unwrap_or_else(|| {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("app.toml")
    });
    let mut config = Config::from_file(&path)?;
    if let Some(entries) = args.entries {
        config.pmp.entries = entries;
    }
    if let Some(granularity) = args.granularity {
        config.pmp.granularity = granularity;
    }

    let report = pmp_blinky::run(&config, Box::new(std::io::stdout()))?;
    match report.outcome {
        Some(Outcome {
            reason: StopReason::Faulted { task, fault },
            ticks,
        }) => {
            eprintln!(
                "task {} ({}) faulted at tick {}: {fault}",
                task.0,
                config.tasks.get_index(task.0).map_or("?", |(n, _)| n.as_str()),
                u64::from(ticks),
            );
        }
        Some(Outcome {
            reason: StopReason::Stalled,
            ticks,
        }) => {
            eprintln!("every task blocked at tick {}", u64::from(ticks));
        }
        _ => (),
    }
    std::process::exit(report.exit_code)
}
