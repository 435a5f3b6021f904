// SPDX-License-Identifier: AGPL-3.0-only

//! Driver and validation harness for the auction assignment accelerator.
//!
//! The accelerator solves the assignment problem (agents × objects,
//! maximise total reward) behind a small register file. This crate drives
//! it and checks its answers against a software reference.
//!
//! # Layers
//!
//! ```text
//! Harness        problem files → instance runs → batch report
//!   ├─ verify    hardware vs reference: identical, alternate optimum, mismatch
//!   ├─ protocol  attach → configure → start → poll → read outputs → detach
//!   ├─ marshal   reward matrix ⇄ fixed-stride device buffer
//!   └─ solver    software reference (forward auction)
//! Platform       SoftwarePlatform (virtual accelerator) | UioPlatform (Linux UIO)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use auction_driver::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let rewards = RewardMatrix::from_rows(vec![vec![10, 0], vec![0, 10]])?;
//! let mut platform = SoftwarePlatform::new();
//! let report = Harness::new(BufferLayout::WIDE).run_instance(&mut platform, &rewards)?;
//! assert!(report.is_valid());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod assignment;
pub mod backends;
pub mod config;
mod error;
pub mod harness;
pub mod marshal;
mod matrix;
mod platform;
pub mod poll;
pub mod problem;
pub mod protocol;
pub mod solver;
pub mod verify;

/// Chip model (re-exported from auction-chip).
pub mod chip {
    pub use auction_chip::layout::{BufferLayout, LayoutMode, WordWidth};
    pub use auction_chip::regs::{Direction, Register, SIGNATURE_MAGIC, SLOT_COUNT};
    pub use auction_chip::ACCELERATOR_NAME;
}

pub use assignment::{Assignment, HardwareAssignment, HardwareSentinel, SOFTWARE_UNASSIGNED};
pub use backends::{SoftwareFaults, SoftwarePlatform, UioPlatform};
pub use config::HarnessConfig;
pub use error::{AuctionError, Result};
pub use harness::{BatchReport, Harness, InstanceOutcome, InstanceReport, InstanceResult};
pub use marshal::{marshal, unmarshal, AlignedBuffer, ResultWords};
pub use matrix::RewardMatrix;
pub use platform::{open_platform, DeviceBuffer, Platform, PlatformType};
pub use poll::{CancelToken, PollPolicy, PollStats};
pub use protocol::{Accelerator, AcceleratorOutputs, ProtocolState, RunConfig, StartMode};
pub use solver::{AuctionSolution, AuctionSolver, ReferenceSolver};
pub use verify::{verify, verify_raw, verify_resolved, ComparisonResult, Verdict};

/// Commonly used types.
pub mod prelude {
    pub use crate::chip::{BufferLayout, LayoutMode};
    pub use crate::{
        Accelerator, Assignment, AuctionError, AuctionSolver, ComparisonResult, Harness,
        HarnessConfig, Platform, PollPolicy, ReferenceSolver, Result, RewardMatrix,
        SoftwarePlatform, StartMode, Verdict,
    };
}
