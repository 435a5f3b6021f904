// SPDX-License-Identifier: AGPL-3.0-only

//! Accelerator control protocol.
//!
//! ```text
//!   attach ──► Attached ──configure──► Configured ──start──► Running
//!                 ▲                                             │ poll_finished
//!                 └──────────── configure (next run) ◄── Finished ◄┘
//!
//!   detach: any state ──► Detached
//! ```
//!
//! An [`Accelerator`] owns its platform binding; every register access goes
//! through it. Calls made in the wrong state fail with
//! [`AuctionError::InvalidState`] before touching a register.

use crate::assignment::{HardwareAssignment, HardwareSentinel};
use crate::error::{AuctionError, Result};
use crate::marshal::{decode_result, ResultWords};
use crate::platform::{DeviceBuffer, Platform};
use crate::poll::{poll_until, PollPolicy, PollStats};
use auction_chip::layout::BufferLayout;
use auction_chip::regs::{self, split_u64, Register};
use bytes::Bytes;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Protocol state of an accelerator binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Not yet bound.
    Unattached,
    /// Bound and identity checked.
    Attached,
    /// Addresses and dimensions written.
    Configured,
    /// Start issued, completion not yet observed.
    Running,
    /// Completion observed; outputs may be read.
    Finished,
    /// Binding released.
    Detached,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unattached => "unattached",
            Self::Attached => "attached",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// How the start register is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Write 1 then 0.
    #[default]
    Pulse,
    /// Write 1 and leave it asserted.
    Level,
}

impl StartMode {
    /// Parse `pulse` or `level` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pulse" => Some(Self::Pulse),
            "level" | "hold" => Some(Self::Level),
            _ => None,
        }
    }
}

/// Parameters written by [`Accelerator::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Device address of the marshalled reward buffer.
    pub reward_base: u64,
    /// Device address of the result buffer.
    pub result_base: u64,
    /// Agent count.
    pub n_agents: u32,
    /// Object count.
    pub n_objects: u32,
}

/// Outputs of a finished run.
#[derive(Debug, Clone)]
pub struct AcceleratorOutputs {
    /// Value of the cycle-count register.
    pub cycles: u32,
    /// Decoded result words.
    pub words: ResultWords,
    /// Result buffer as copied back.
    pub raw: Bytes,
}

impl AcceleratorOutputs {
    /// Raw per-object agent words, tagged with the hardware sentinel.
    pub fn assignment(&self, sentinel: HardwareSentinel) -> HardwareAssignment {
        HardwareAssignment::new(self.words.agents.clone(), sentinel)
    }
}

/// Owned binding to one accelerator instance.
#[derive(Debug)]
pub struct Accelerator<P: Platform> {
    platform: P,
    state: ProtocolState,
    start_mode: StartMode,
    run: Option<RunConfig>,
}

impl<P: Platform> Accelerator<P> {
    /// Bind to the accelerator registered as `name` and check its signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::UnexpectedSignature`] if the signature
    /// register does not hold [`regs::SIGNATURE_MAGIC`]; the binding is
    /// released and no other register is touched.
    pub fn attach(mut platform: P, name: &str) -> Result<Self> {
        platform.attach(name)?;
        let signature = platform.read_reg(Register::Signature.slots()[0])?;
        if signature != regs::SIGNATURE_MAGIC {
            if let Err(e) = platform.detach() {
                warn!("Detach after signature mismatch failed: {e}");
            }
            return Err(AuctionError::UnexpectedSignature {
                found: signature,
                expected: regs::SIGNATURE_MAGIC,
            });
        }
        info!("Attached to {name} on {} platform", platform.platform_type());
        Ok(Self {
            platform,
            state: ProtocolState::Attached,
            start_mode: StartMode::default(),
            run: None,
        })
    }

    /// Select how [`start`](Self::start) drives the start register.
    #[must_use]
    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    /// Current protocol state.
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// Parameters of the current run, once configured.
    pub const fn run_config(&self) -> Option<&RunConfig> {
        self.run.as_ref()
    }

    /// Underlying platform, for buffer management.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Write buffer addresses and problem dimensions.
    ///
    /// Order: reward base (hi, lo), result base (hi, lo), agents, objects.
    ///
    /// # Errors
    ///
    /// Returns error unless the accelerator is `Attached` or `Finished`,
    /// or if a dimension is zero.
    pub fn configure(&mut self, run: RunConfig) -> Result<()> {
        self.expect_state("configure", &[ProtocolState::Attached, ProtocolState::Finished])?;
        if run.n_agents == 0 || run.n_objects == 0 {
            return Err(AuctionError::invalid_problem(format!(
                "cannot configure a {}×{} problem",
                run.n_agents, run.n_objects
            )));
        }
        self.write_register(Register::RewardBase, run.reward_base)?;
        self.write_register(Register::ResultBase, run.result_base)?;
        self.write_register(Register::AgentCount, u64::from(run.n_agents))?;
        self.write_register(Register::ObjectCount, u64::from(run.n_objects))?;
        debug!(
            "Configured {}×{} run: rewards @ {:#x}, results @ {:#x}",
            run.n_agents, run.n_objects, run.reward_base, run.result_base
        );
        self.run = Some(run);
        self.state = ProtocolState::Configured;
        Ok(())
    }

    /// Signal the accelerator to begin.
    ///
    /// # Errors
    ///
    /// Returns error unless the accelerator is `Configured`.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state("start", &[ProtocolState::Configured])?;
        self.write_register(Register::Start, u64::from(regs::start::ASSERT))?;
        if self.start_mode == StartMode::Pulse {
            self.write_register(Register::Start, u64::from(regs::start::CLEAR))?;
        }
        debug!("Started ({:?})", self.start_mode);
        self.state = ProtocolState::Running;
        Ok(())
    }

    /// Poll the finished register until it reads done.
    ///
    /// # Errors
    ///
    /// Returns error unless the accelerator is `Running`, or when the
    /// policy's bound is hit; the state stays `Running` in that case.
    pub fn poll_finished(&mut self, policy: &PollPolicy) -> Result<PollStats> {
        self.expect_state("poll", &[ProtocolState::Running])?;
        let slot = Register::Finished.slots()[0];
        let platform = &mut self.platform;
        let stats = poll_until(policy, || {
            Ok(platform.read_reg(slot)? == regs::finished::DONE)
        })?;
        debug!("Finished after {} polls ({:?})", stats.polls, stats.elapsed);
        self.state = ProtocolState::Finished;
        Ok(stats)
    }

    /// Read the cycle count and copy back the result buffer.
    ///
    /// # Errors
    ///
    /// Returns error unless the accelerator is `Finished`, if `result` is
    /// smaller than the layout's result size, or if the copy fails.
    pub fn read_outputs(
        &mut self,
        result: &DeviceBuffer,
        layout: &BufferLayout,
    ) -> Result<AcceleratorOutputs> {
        self.expect_state("read outputs", &[ProtocolState::Finished])?;
        let n_objects = self.run.map_or(0, |r| r.n_objects as usize);
        let needed = layout.result_bytes(n_objects);
        if result.len() < needed {
            return Err(AuctionError::malformed_buffer(format!(
                "result buffer holds {} bytes, {n_objects} objects need {needed}",
                result.len()
            )));
        }
        let cycles = self.read_register(Register::CycleCount)?;
        let mut raw = vec![0u8; needed];
        self.platform.copy_from_device(result, &mut raw)?;
        let words = decode_result(&raw, layout, n_objects)?;
        Ok(AcceleratorOutputs {
            cycles,
            words,
            raw: Bytes::from(raw),
        })
    }

    /// Read a status register by its exported name.
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown, the register is write-only,
    /// or the value spans two register slots.
    pub fn read_status_reg(&mut self, name: &str) -> Result<u32> {
        self.expect_attached("read status")?;
        let register = Register::from_name(name).ok_or_else(|| AuctionError::UnknownRegister {
            name: name.to_string(),
        })?;
        if register.is_split() {
            return Err(AuctionError::UnsupportedWideRegister { register });
        }
        self.read_register(register)
    }

    /// Read every readable register.
    ///
    /// # Errors
    ///
    /// Returns error if any read fails.
    pub fn status_regs(&mut self) -> Result<Vec<(Register, u32)>> {
        Register::ALL
            .into_iter()
            .filter(|r| r.direction().is_readable())
            .map(|r| self.read_register(r).map(|v| (r, v)))
            .collect()
    }

    /// Release the binding.
    ///
    /// # Errors
    ///
    /// Returns error if the platform fails to detach.
    pub fn detach(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if matches!(self.state, ProtocolState::Detached | ProtocolState::Unattached) {
            return Ok(());
        }
        self.state = ProtocolState::Detached;
        self.platform.detach()?;
        info!("Detached");
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, allowed: &[ProtocolState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AuctionError::invalid_state(operation, self.state))
        }
    }

    fn expect_attached(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ProtocolState::Unattached | ProtocolState::Detached => {
                Err(AuctionError::invalid_state(operation, self.state))
            }
            _ => Ok(()),
        }
    }

    fn write_register(&mut self, register: Register, value: u64) -> Result<()> {
        if !register.direction().is_writable() {
            return Err(AuctionError::platform(format!("{register} is not writable")));
        }
        match register.slots() {
            [slot] => {
                let word = u32::try_from(value).map_err(|_| {
                    AuctionError::platform(format!("{value:#x} does not fit {register}"))
                })?;
                trace!("{register}[{slot}] <- {word:#x}");
                self.platform.write_reg(*slot, word)
            }
            [hi_slot, lo_slot] => {
                let (hi, lo) = split_u64(value);
                trace!("{register}[{hi_slot},{lo_slot}] <- {value:#x}");
                self.platform.write_reg(*hi_slot, hi)?;
                self.platform.write_reg(*lo_slot, lo)
            }
            slots => Err(AuctionError::platform(format!(
                "{register} spans {} slots",
                slots.len()
            ))),
        }
    }

    fn read_register(&mut self, register: Register) -> Result<u32> {
        if !register.direction().is_readable() {
            return Err(AuctionError::NotReadable { register });
        }
        let slot = register
            .slot()
            .ok_or(AuctionError::UnsupportedWideRegister { register })?;
        self.platform.read_reg(slot)
    }
}

impl<P: Platform> Drop for Accelerator<P> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Detach on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::{SoftwareFaults, SoftwarePlatform};
    use crate::platform::Platform;

    fn attached() -> Accelerator<SoftwarePlatform> {
        Accelerator::attach(SoftwarePlatform::new(), auction_chip::ACCELERATOR_NAME).unwrap()
    }

    fn run_config() -> RunConfig {
        RunConfig {
            reward_base: 0x0000_0001_0000_0000,
            result_base: 0x0000_0001_0000_1000,
            n_agents: 3,
            n_objects: 2,
        }
    }

    #[test]
    fn attach_checks_signature() {
        let acc = attached();
        assert_eq!(acc.state(), ProtocolState::Attached);
    }

    #[test]
    fn wrong_signature_fails_before_any_write() {
        let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
            signature: Some(0xdead_beef),
            ..SoftwareFaults::default()
        });
        let err = Accelerator::attach(&mut platform, "Auction").unwrap_err();
        assert!(matches!(
            err,
            AuctionError::UnexpectedSignature { found: 0xdead_beef, expected: regs::SIGNATURE_MAGIC }
        ));
        assert!(platform.write_log().is_empty());
        assert!(!platform.is_attached());
    }

    #[test]
    fn configure_writes_high_halves_first() {
        let mut acc = attached();
        acc.configure(run_config()).unwrap();
        assert_eq!(acc.state(), ProtocolState::Configured);
        let log = acc.platform_mut().write_log().to_vec();
        assert_eq!(
            log,
            vec![(5, 0x1), (6, 0x0), (1, 0x1), (2, 0x1000), (4, 3), (3, 2)]
        );
    }

    #[test]
    fn start_before_configure_is_rejected_without_writes() {
        let mut acc = attached();
        let err = acc.start().unwrap_err();
        assert!(matches!(err, AuctionError::InvalidState { operation: "start", .. }));
        assert!(acc.platform_mut().write_log().is_empty());
    }

    #[test]
    fn configure_twice_is_rejected() {
        let mut acc = attached();
        acc.configure(run_config()).unwrap();
        assert!(matches!(
            acc.configure(run_config()),
            Err(AuctionError::InvalidState { .. })
        ));
    }

    #[test]
    fn zero_dimension_rejected() {
        let mut acc = attached();
        let run = RunConfig { n_objects: 0, ..run_config() };
        assert!(acc.configure(run).is_err());
        assert_eq!(acc.state(), ProtocolState::Attached);
    }

    #[test]
    fn pulse_and_level_start() {
        let mut acc = attached();
        acc.configure(run_config()).unwrap();
        acc.platform_mut().clear_write_log();
        acc.start().unwrap();
        assert_eq!(acc.platform_mut().write_log(), &[(7, 1), (7, 0)]);
        assert_eq!(acc.state(), ProtocolState::Running);

        let mut acc = attached().with_start_mode(StartMode::Level);
        acc.configure(run_config()).unwrap();
        acc.platform_mut().clear_write_log();
        acc.start().unwrap();
        assert_eq!(acc.platform_mut().write_log(), &[(7, 1)]);
    }

    #[test]
    fn outputs_require_finished() {
        let mut acc = attached();
        let buf = DeviceBuffer::new(0, 64);
        assert!(matches!(
            acc.read_outputs(&buf, &BufferLayout::WIDE),
            Err(AuctionError::InvalidState { .. })
        ));
    }

    #[test]
    fn never_finishing_device_hits_poll_bound() {
        let platform = SoftwarePlatform::with_faults(SoftwareFaults {
            never_finish: true,
            ..SoftwareFaults::default()
        });
        let mut acc = Accelerator::attach(platform, "Auction").unwrap();
        acc.configure(run_config()).unwrap();
        acc.start().unwrap();
        let err = acc.poll_finished(&PollPolicy::bounded(1_000)).unwrap_err();
        assert!(matches!(err, AuctionError::PollTimeout { polls: 1_000, .. }));
        assert_eq!(acc.state(), ProtocolState::Running);
    }

    #[test]
    fn status_register_lookup() {
        let mut acc = attached();
        assert_eq!(acc.read_status_reg("signature").unwrap(), regs::SIGNATURE_MAGIC);
        assert_eq!(acc.read_status_reg("rfOut_finished").unwrap(), 0);
        assert!(matches!(
            acc.read_status_reg("rfIn_baseAddr"),
            Err(AuctionError::UnsupportedWideRegister { register: Register::RewardBase })
        ));
        assert!(matches!(
            acc.read_status_reg("rfIn_nAgents"),
            Err(AuctionError::NotReadable { .. })
        ));
        assert!(matches!(
            acc.read_status_reg("rfOut_prices"),
            Err(AuctionError::UnknownRegister { .. })
        ));
        let regs = acc.status_regs().unwrap();
        assert_eq!(regs.len(), 3);
    }

    #[test]
    fn drop_detaches() {
        let mut platform = SoftwarePlatform::new();
        {
            let acc = Accelerator::attach(&mut platform, "Auction").unwrap();
            assert_eq!(acc.state(), ProtocolState::Attached);
        }
        assert!(!platform.is_attached());
    }

    #[test]
    fn explicit_detach() {
        let mut platform = SoftwarePlatform::new();
        let acc = Accelerator::attach(&mut platform, "Auction").unwrap();
        acc.detach().unwrap();
        assert!(!platform.is_attached());
        assert_eq!(platform.platform_type(), crate::platform::PlatformType::Software);
    }
}
