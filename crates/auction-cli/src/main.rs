// SPDX-License-Identifier: AGPL-3.0-only

//! `auction` — validation harness for the auction assignment accelerator.
//!
//! ```text
//! USAGE:
//!   auction run [dirs...]            Validate every problem file in dirs
//!   auction solve <csv>              Solve one problem in software
//!   auction verify -r <csv> -s <csv> -w <csv>
//!                                    Check saved hardware words
//!   auction regs                     Print the register map
//!   auction probe                    Attach and dump status registers
//!   auction config                   Print the effective configuration
//! ```
//!
//! Configuration comes from `--config`, else `./auction-harness.toml`,
//! then `AUCTION_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use auction_chip::regs::Register;
use auction_driver::{
    open_platform, problem, verify_raw, Accelerator, AuctionSolver, Harness, HarnessConfig,
    HardwareAssignment, HardwareSentinel, InstanceOutcome, ReferenceSolver,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "auction",
    about = "Auction assignment accelerator validation harness",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

/// Options shared by the commands that talk to a platform.
#[derive(Args)]
struct Common {
    /// Config file (default: ./auction-harness.toml if present).
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Platform: software or uio.
    #[arg(long)]
    backend: Option<String>,
    /// UIO device node.
    #[arg(long)]
    device: Option<PathBuf>,
    /// Buffer layout: narrow or wide.
    #[arg(long)]
    layout: Option<String>,
}

impl Common {
    fn load(&self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::load(self.config.as_deref())?;
        if let Some(backend) = &self.backend {
            config.backend.clone_from(backend);
        }
        if let Some(device) = &self.device {
            config.uio_device.clone_from(device);
        }
        if let Some(layout) = &self.layout {
            config.layout.clone_from(layout);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Validate the accelerator against the software reference.
    Run {
        #[command(flatten)]
        common: Common,
        /// Keep going after a failing instance.
        #[arg(long)]
        keep_going: bool,
        /// Give up polling for completion after this many reads.
        #[arg(long)]
        max_polls: Option<u64>,
        /// Problem directories (default: from config).
        dirs: Vec<PathBuf>,
    },
    /// Solve one problem file with the software reference.
    Solve {
        /// Reward CSV file.
        problem: PathBuf,
    },
    /// Verify saved accelerator result words against a reference.
    Verify {
        /// Reward CSV file.
        #[arg(long, short)]
        rewards: PathBuf,
        /// Reference assignment CSV (agent per object, -1 = unassigned).
        #[arg(long, short)]
        software: PathBuf,
        /// Raw accelerator result words CSV.
        #[arg(long = "hardware", short = 'w')]
        hardware: PathBuf,
        /// Raw word meaning "unassigned" (default: 0, shared with agent 0).
        #[arg(long)]
        sentinel: Option<u64>,
    },
    /// Print the register map.
    Regs,
    /// Attach to the accelerator and dump its readable registers.
    Probe {
        #[command(flatten)]
        common: Common,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        common: Common,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            common,
            keep_going,
            max_polls,
            dirs,
        } => cmd_run(&common, keep_going, max_polls, dirs),
        Cmd::Solve { problem } => cmd_solve(&problem),
        Cmd::Verify {
            rewards,
            software,
            hardware,
            sentinel,
        } => cmd_verify(&rewards, &software, &hardware, sentinel),
        Cmd::Regs => {
            cmd_regs();
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Probe { common } => cmd_probe(&common).map(|()| ExitCode::SUCCESS),
        Cmd::Config { common } => {
            print!("{}", common.load()?.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_run(
    common: &Common,
    keep_going: bool,
    max_polls: Option<u64>,
    dirs: Vec<PathBuf>,
) -> Result<ExitCode> {
    let mut config = common.load()?;
    if keep_going {
        config.stop_on_failure = false;
    }
    if max_polls.is_some() {
        config.max_polls = max_polls;
    }
    if !dirs.is_empty() {
        config.problem_dirs = dirs;
    }

    let paths = problem::discover(&config.problem_dirs)?;
    if paths.is_empty() {
        anyhow::bail!("No problem files found in {:?}", config.problem_dirs);
    }

    let harness = Harness::from_config(&config)?;
    let mut platform = open_platform(
        config.platform_type()?,
        &config.uio_device,
        harness.layout(),
    )?;
    let report = harness.run_batch(&mut platform, &paths);

    println!();
    for result in &report.results {
        let status = match &result.outcome {
            InstanceOutcome::Checked(rep) => format!(
                "{:<5} {}x{}  {} cycles  {}",
                if rep.is_valid() { "PASS" } else { "FAIL" },
                rep.n_agents,
                rep.n_objects,
                rep.cycles,
                rep.comparison.verdict
            ),
            InstanceOutcome::Skipped => "SKIP  empty".to_string(),
            InstanceOutcome::Errored(e) => format!("ERROR {e}"),
        };
        println!("{status}  {}", result.path.display());
    }
    println!();
    println!(
        "Passed {} ({} identical, {} alternate optima), failed {}, skipped {}, not run {}",
        report.passed(),
        report.identical(),
        report.alternate_optima(),
        report.failed(),
        report.skipped(),
        report.not_run
    );

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_solve(path: &Path) -> Result<ExitCode> {
    let Some(rewards) = problem::load_csv(path)? else {
        println!("{}: empty, nothing to solve", path.display());
        return Ok(ExitCode::SUCCESS);
    };
    let solver = AuctionSolver::new();
    let solution = solver.solve(&rewards)?;
    let gain = solution.assignment.gain(&rewards)?;

    println!("Problem    : {} agents x {} objects", rewards.n_agents(), rewards.n_objects());
    println!("Solver     : {} ({} bids)", solver.name(), solution.bids);
    println!("Assignment : {}", solution.assignment);
    println!("Gain       : {gain}");
    let prices: Vec<String> = solution.prices.iter().map(ToString::to_string).collect();
    println!("Prices     : {}", prices.join(" "));
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(
    rewards: &Path,
    software: &Path,
    hardware: &Path,
    sentinel: Option<u64>,
) -> Result<ExitCode> {
    let matrix = problem::load_csv(rewards)?
        .with_context(|| format!("{} holds no problem", rewards.display()))?;
    let reference = problem::load_assignment(software)?;
    let sentinel = sentinel.map_or(HardwareSentinel::Zero, HardwareSentinel::Value);
    let words = HardwareAssignment::new(problem::load_words(hardware)?, sentinel);

    let result = verify_raw(&matrix, &reference, &words)?;
    println!("Verdict       : {}", result.verdict);
    println!("Software gain : {}", result.software_gain);
    println!("Hardware gain : {}", result.hardware_gain);
    if !result.mismatches.is_empty() {
        println!("Mismatched objects: {:?}", result.mismatches);
    }
    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_regs() {
    println!("{:<8} {:<18} {:<9} Width", "Slots", "Name", "Role");
    for reg in Register::ALL {
        let slots: Vec<String> = reg.slots().iter().map(ToString::to_string).collect();
        println!(
            "{:<8} {:<18} {:<9} {}",
            slots.join(","),
            reg.name(),
            format!("{:?}", reg.direction()),
            if reg.is_split() { 64 } else { 32 }
        );
    }
}

fn cmd_probe(common: &Common) -> Result<()> {
    let config = common.load()?;
    let layout = config.layout_mode()?.layout();
    let platform = open_platform(config.platform_type()?, &config.uio_device, &layout)?;
    let mut acc = Accelerator::attach(platform, &config.accelerator_name)?;

    println!("Accelerator  : {} ({})", config.accelerator_name, config.backend);
    for (reg, value) in acc.status_regs()? {
        println!("{:<18} : {value:#010x} ({value})", reg.name());
    }
    acc.detach()?;
    Ok(())
}
