// SPDX-License-Identifier: AGPL-3.0-only

//! Validation harness: software reference vs accelerator, per instance.
//!
//! ```text
//! rewards ─► solve (software) ─────────────────────────────┐
//!        └─► marshal ─► alloc/copy ─► attach ─► configure   │
//!                       ─► start ─► poll ─► read outputs    ├─► resolve ─► verify
//!                       ─► detach ─► free ───────────────────┘
//! ```
//!
//! Every accelerator binding is fresh per instance. Device buffers are
//! released whether or not the run succeeded.

use crate::assignment::{Assignment, HardwareSentinel};
use crate::config::HarnessConfig;
use crate::error::{AuctionError, Result};
use crate::marshal::marshal;
use crate::matrix::RewardMatrix;
use crate::platform::{DeviceBuffer, Platform};
use crate::poll::{PollPolicy, PollStats};
use crate::problem;
use crate::protocol::{Accelerator, AcceleratorOutputs, RunConfig, StartMode};
use crate::solver::{AuctionSolver, ReferenceSolver};
use crate::verify::{verify_resolved, ComparisonResult, Verdict};
use auction_chip::layout::BufferLayout;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Result of one checked instance.
#[derive(Debug, Clone)]
pub struct InstanceReport {
    /// Agent count.
    pub n_agents: usize,
    /// Object count.
    pub n_objects: usize,
    /// Accelerator cycle count.
    pub cycles: u32,
    /// Completion polls.
    pub polls: u64,
    /// Time spent in the software solver.
    pub software_time: Duration,
    /// Time from start to completion on the accelerator.
    pub hardware_time: Duration,
    /// Bids placed by the software solver.
    pub software_bids: u64,
    /// Reference assignment.
    pub software: Assignment,
    /// Resolved accelerator assignment.
    pub hardware: Assignment,
    /// Verification outcome.
    pub comparison: ComparisonResult,
}

impl InstanceReport {
    /// Whether the accelerator result was accepted.
    pub const fn is_valid(&self) -> bool {
        self.comparison.is_valid()
    }
}

/// What happened to one problem file.
#[derive(Debug)]
pub enum InstanceOutcome {
    /// Ran and verified (valid or not).
    Checked(InstanceReport),
    /// File held no problem.
    Skipped,
    /// The run failed before verification.
    Errored(AuctionError),
}

/// One problem file and its outcome.
#[derive(Debug)]
pub struct InstanceResult {
    /// Problem file.
    pub path: PathBuf,
    /// Outcome.
    pub outcome: InstanceOutcome,
}

impl InstanceResult {
    /// Whether this instance counts as a failure.
    pub const fn is_failure(&self) -> bool {
        match &self.outcome {
            InstanceOutcome::Checked(report) => !report.is_valid(),
            InstanceOutcome::Skipped => false,
            InstanceOutcome::Errored(_) => true,
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Per-file results, in run order.
    pub results: Vec<InstanceResult>,
    /// Files left unrun after a failure stopped the batch.
    pub not_run: usize,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&InstanceResult) -> bool) -> usize {
        self.results.iter().filter(|r| pred(r)).count()
    }

    /// Instances whose accelerator result matched exactly.
    pub fn identical(&self) -> usize {
        self.count(|r| {
            matches!(&r.outcome, InstanceOutcome::Checked(rep) if rep.comparison.verdict == Verdict::Identical)
        })
    }

    /// Instances accepted as alternate optima.
    pub fn alternate_optima(&self) -> usize {
        self.count(|r| {
            matches!(&r.outcome, InstanceOutcome::Checked(rep)
                if matches!(rep.comparison.verdict, Verdict::AlternateOptimum { .. }))
        })
    }

    /// Instances accepted in total.
    pub fn passed(&self) -> usize {
        self.identical() + self.alternate_optima()
    }

    /// Instances that failed verification or errored.
    pub fn failed(&self) -> usize {
        self.count(InstanceResult::is_failure)
    }

    /// Empty files skipped.
    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r.outcome, InstanceOutcome::Skipped))
    }

    /// Whether every instance passed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// First failing instance.
    pub fn first_failure(&self) -> Option<&InstanceResult> {
        self.results.iter().find(|r| r.is_failure())
    }
}

/// Drives instances through the software reference and the accelerator.
#[derive(Debug, Clone)]
pub struct Harness<S = AuctionSolver> {
    layout: BufferLayout,
    start_mode: StartMode,
    poll: PollPolicy,
    accelerator_name: String,
    sentinel: HardwareSentinel,
    stop_on_failure: bool,
    solver: S,
}

impl Harness<AuctionSolver> {
    /// Harness for `layout` with the auction reference solver.
    pub fn new(layout: BufferLayout) -> Self {
        Self::with_solver(layout, AuctionSolver::new())
    }

    /// Harness configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns error if a configured name is not recognised.
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        Ok(Self::new(config.layout_mode()?.layout())
            .with_start_mode(config.start_mode()?)
            .with_poll_policy(config.poll_policy())
            .with_accelerator_name(&config.accelerator_name)
            .with_stop_on_failure(config.stop_on_failure))
    }
}

impl<S: ReferenceSolver> Harness<S> {
    /// Harness for `layout` with a custom reference solver.
    pub fn with_solver(layout: BufferLayout, solver: S) -> Self {
        Self {
            layout,
            start_mode: StartMode::default(),
            poll: PollPolicy::blocking(),
            accelerator_name: auction_chip::ACCELERATOR_NAME.to_string(),
            sentinel: HardwareSentinel::default(),
            stop_on_failure: true,
            solver,
        }
    }

    /// Start register handling.
    #[must_use]
    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    /// Completion poll bounds.
    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll = policy;
        self
    }

    /// Platform name of the accelerator.
    #[must_use]
    pub fn with_accelerator_name(mut self, name: &str) -> Self {
        self.accelerator_name = name.to_string();
        self
    }

    /// How the accelerator encodes "unassigned".
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: HardwareSentinel) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Whether a batch stops at the first failure.
    #[must_use]
    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Buffer layout in use.
    pub const fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Solve `rewards` in software and on the accelerator, then verify.
    ///
    /// # Errors
    ///
    /// Returns error if the matrix does not fit the layout (before any
    /// device access), or any protocol or platform step fails.
    pub fn run_instance<P: Platform>(
        &self,
        platform: &mut P,
        rewards: &RewardMatrix,
    ) -> Result<InstanceReport> {
        let buffer = marshal(rewards, &self.layout)?;
        let run_dims = (
            u32::try_from(rewards.n_agents())
                .map_err(|_| AuctionError::invalid_problem("agent count exceeds 32 bits"))?,
            u32::try_from(rewards.n_objects())
                .map_err(|_| AuctionError::invalid_problem("object count exceeds 32 bits"))?,
        );

        let sw_start = Instant::now();
        let solution = self.solver.solve(rewards)?;
        let software_time = sw_start.elapsed();

        let input = platform.alloc(buffer.len())?;
        let output = match platform.alloc(self.layout.result_bytes(rewards.n_objects())) {
            Ok(output) => output,
            Err(e) => {
                release(platform, input);
                return Err(e);
            }
        };
        let device_run = (|| -> Result<(AcceleratorOutputs, PollStats)> {
            platform.copy_to_device(buffer.as_bytes(), &input)?;
            self.run_device(&mut *platform, &input, &output, run_dims)
        })();
        release(platform, input);
        release(platform, output);
        let (outputs, stats) = device_run?;

        let hardware = outputs
            .assignment(self.sentinel)
            .resolve(&solution.assignment, rewards.n_agents())?;
        let comparison =
            verify_resolved(rewards, &solution.assignment, &hardware, self.sentinel)?;

        Ok(InstanceReport {
            n_agents: rewards.n_agents(),
            n_objects: rewards.n_objects(),
            cycles: outputs.cycles,
            polls: stats.polls,
            software_time,
            hardware_time: stats.elapsed,
            software_bids: solution.bids,
            software: solution.assignment,
            hardware,
            comparison,
        })
    }

    fn run_device<P: Platform>(
        &self,
        platform: P,
        input: &DeviceBuffer,
        output: &DeviceBuffer,
        (n_agents, n_objects): (u32, u32),
    ) -> Result<(AcceleratorOutputs, PollStats)> {
        let mut acc =
            Accelerator::attach(platform, &self.accelerator_name)?.with_start_mode(self.start_mode);
        acc.configure(RunConfig {
            reward_base: input.addr(),
            result_base: output.addr(),
            n_agents,
            n_objects,
        })?;
        acc.start()?;
        let stats = acc.poll_finished(&self.poll)?;
        let outputs = acc.read_outputs(output, &self.layout)?;
        acc.detach()?;
        Ok((outputs, stats))
    }

    /// Load and run one problem file. `None` if the file holds no problem.
    ///
    /// # Errors
    ///
    /// Returns error if the file is malformed or the run fails.
    pub fn run_file<P: Platform>(
        &self,
        platform: &mut P,
        path: &Path,
    ) -> Result<Option<InstanceReport>> {
        let Some(rewards) = problem::load_csv(path)? else {
            return Ok(None);
        };
        self.run_instance(platform, &rewards).map(Some)
    }

    /// Run every file in `paths`, stopping at the first failure if so
    /// configured.
    pub fn run_batch<P: Platform>(&self, platform: &mut P, paths: &[PathBuf]) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, path) in paths.iter().enumerate() {
            let outcome = match self.run_file(platform, path) {
                Ok(Some(rep)) => {
                    log_instance(path, &rep);
                    InstanceOutcome::Checked(rep)
                }
                Ok(None) => {
                    info!("{}: empty, skipped", path.display());
                    InstanceOutcome::Skipped
                }
                Err(e) => {
                    error!("{}: {e}", path.display());
                    InstanceOutcome::Errored(e)
                }
            };
            let result = InstanceResult {
                path: path.clone(),
                outcome,
            };
            let failed = result.is_failure();
            report.results.push(result);
            if failed && self.stop_on_failure {
                report.not_run = paths.len() - i - 1;
                warn!("Stopping batch, {} instances not run", report.not_run);
                break;
            }
        }
        info!(
            "Batch: {} passed ({} alternate optima), {} failed, {} skipped",
            report.passed(),
            report.alternate_optima(),
            report.failed(),
            report.skipped()
        );
        report
    }
}

fn release<P: Platform>(platform: &mut P, buffer: DeviceBuffer) {
    if let Err(e) = platform.free(buffer) {
        warn!("Failed to free device buffer {:#x}: {e}", buffer.addr());
    }
}

fn log_instance(path: &Path, rep: &InstanceReport) {
    let line = format!(
        "{}: {}×{} {} cycles, {} polls, software {:?}",
        path.display(),
        rep.n_agents,
        rep.n_objects,
        rep.cycles,
        rep.polls,
        rep.software_time
    );
    if rep.is_valid() {
        info!("{line}: {}", rep.comparison.verdict);
    } else {
        error!("{line}: {}", rep.comparison.verdict);
        error!("SW assignment: {}", rep.software);
        error!("HW assignment: {}", rep.hardware);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::{SoftwareFaults, SoftwarePlatform};

    fn diagonal() -> RewardMatrix {
        RewardMatrix::from_rows(vec![vec![10, 0], vec![0, 10]]).unwrap()
    }

    #[test]
    fn instance_passes_on_virtual_accelerator() {
        let mut platform = SoftwarePlatform::new();
        let harness = Harness::new(BufferLayout::WIDE);
        let report = harness.run_instance(&mut platform, &diagonal()).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.comparison.software_gain, 20);
        assert_eq!(report.polls, 3);
        assert_eq!(platform.live_buffers(), 0);
        assert!(!platform.is_attached());
    }

    #[test]
    fn oversized_problem_fails_before_device_access() {
        let mut platform = SoftwarePlatform::new().with_layout(BufferLayout::NARROW);
        let harness = Harness::new(BufferLayout::NARROW);
        let m = RewardMatrix::from_flat(1025, 1, vec![1; 1025]).unwrap();
        let err = harness.run_instance(&mut platform, &m).unwrap_err();
        assert!(matches!(err, AuctionError::CapacityExceeded { .. }));
        assert!(platform.write_log().is_empty());
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn hung_device_times_out_and_frees_buffers() {
        let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
            never_finish: true,
            ..SoftwareFaults::default()
        });
        let harness = Harness::new(BufferLayout::WIDE).with_poll_policy(PollPolicy::bounded(100));
        let err = harness.run_instance(&mut platform, &diagonal()).unwrap_err();
        assert!(matches!(err, AuctionError::PollTimeout { polls: 100, .. }));
        assert_eq!(platform.live_buffers(), 0);
        assert!(!platform.is_attached());
    }

    #[test]
    fn level_start_works_per_instance() {
        let mut platform = SoftwarePlatform::new();
        let harness = Harness::new(BufferLayout::WIDE).with_start_mode(StartMode::Level);
        for _ in 0..2 {
            assert!(harness.run_instance(&mut platform, &diagonal()).unwrap().is_valid());
        }
        assert_eq!(platform.runs(), 2);
    }
}
