// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual accelerator) platform
//!
//! Implements [`Platform`] entirely in host memory so the control protocol
//! and the whole validation harness run without an FPGA:
//!
//! ```text
//! register file     10 slots, signature preloaded on attach
//! device memory     address-keyed buffers from a bump allocator
//! start (0 → 1)     unmarshal rewards, solve, write result buffer
//! rfOut_finished    reads 1 after a configurable number of polls
//! rfOut_cycleCount  bids placed by the solver
//! ```
//!
//! The result buffer uses the accelerator's encoding: agent words with `0`
//! for unassigned, followed by the final prices. Only the register-level
//! behaviour is modelled; the assignment itself comes from
//! [`AuctionSolver`].
//!
//! A run that cannot read its buffers behaves like a hung device: the
//! finished flag never rises and [`SoftwarePlatform::last_error`] says why.
//!
//! Runs trigger on the rising edge of the start register. In level mode the
//! register stays asserted, so the next run needs a fresh binding (attach
//! clears the register file).

use crate::error::{AuctionError, Result};
use crate::marshal::{encode_result, unmarshal};
use crate::matrix::RewardMatrix;
use crate::platform::{DeviceBuffer, Platform, PlatformType};
use crate::solver::{AuctionSolver, ReferenceSolver};
use auction_chip::layout::BufferLayout;
use auction_chip::regs::{self, join_u64, Register, SLOT_COUNT};
use auction_chip::ACCELERATOR_NAME;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// First address handed out by the allocator; above 4 GiB so both address
/// halves are exercised.
const MEMORY_BASE: u64 = 0x0000_0001_0000_0000;

/// Allocation granularity.
const ALIGN: u64 = 64;

/// Faults the virtual accelerator can be told to exhibit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareFaults {
    /// Report this signature instead of the auction magic value.
    pub signature: Option<u32>,
    /// Never raise the finished flag.
    pub never_finish: bool,
    /// Swap the agents of these two objects in the result buffer.
    pub swap_objects: Option<(usize, usize)>,
    /// Move the first agent that values an unassigned object as much as
    /// its own onto that object, leaving its old object unassigned.
    pub shift_to_unassigned: bool,
}

/// In-memory virtual accelerator.
#[derive(Debug)]
pub struct SoftwarePlatform {
    regs: [u32; SLOT_COUNT],
    attached: bool,
    layout: BufferLayout,
    finish_after: u64,
    /// Finished-register reads left before the flag rises.
    countdown: Option<u64>,
    memory: BTreeMap<u64, Vec<u8>>,
    next_addr: u64,
    faults: SoftwareFaults,
    write_log: Vec<(usize, u32)>,
    runs: u64,
    last_error: Option<String>,
}

impl Default for SoftwarePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwarePlatform {
    /// Fault-free virtual accelerator using the wide layout.
    pub fn new() -> Self {
        Self::with_faults(SoftwareFaults::default())
    }

    /// Virtual accelerator exhibiting `faults`.
    pub fn with_faults(faults: SoftwareFaults) -> Self {
        Self {
            regs: [0; SLOT_COUNT],
            attached: false,
            layout: BufferLayout::WIDE,
            finish_after: 3,
            countdown: None,
            memory: BTreeMap::new(),
            next_addr: MEMORY_BASE,
            faults,
            write_log: Vec::new(),
            runs: 0,
            last_error: None,
        }
    }

    /// Interpret device buffers with `layout`.
    #[must_use]
    pub const fn with_layout(mut self, layout: BufferLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Raise the finished flag on the `polls`-th status read after start.
    #[must_use]
    pub fn with_finish_after(mut self, polls: u64) -> Self {
        self.finish_after = polls.max(1);
        self
    }

    /// Whether an accelerator is currently bound.
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Register writes since creation, as `(slot, value)`.
    pub fn write_log(&self) -> &[(usize, u32)] {
        &self.write_log
    }

    /// Forget recorded register writes.
    pub fn clear_write_log(&mut self) {
        self.write_log.clear();
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.memory.len()
    }

    /// Runs completed since creation.
    pub const fn runs(&self) -> u64 {
        self.runs
    }

    /// Why the most recent failed run failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if !self.attached {
            return Err(AuctionError::platform("no accelerator bound"));
        }
        if slot >= SLOT_COUNT {
            return Err(AuctionError::platform(format!(
                "register slot {slot} out of range (0..{SLOT_COUNT})"
            )));
        }
        Ok(())
    }

    fn wide(&self, register: Register) -> u64 {
        match register.slots() {
            [hi, lo] => join_u64(self.regs[*hi], self.regs[*lo]),
            [slot] => u64::from(self.regs[*slot]),
            _ => 0,
        }
    }

    fn region(&self, addr: u64) -> Result<&Vec<u8>> {
        self.memory
            .get(&addr)
            .ok_or_else(|| AuctionError::platform(format!("no device buffer at {addr:#x}")))
    }

    /// Execute one run from the configured registers.
    #[allow(clippy::cast_possible_truncation)]
    fn run(&mut self) -> Result<()> {
        let n_agents = self.wide(Register::AgentCount) as usize;
        let n_objects = self.wide(Register::ObjectCount) as usize;
        let reward_base = self.wide(Register::RewardBase);
        let result_base = self.wide(Register::ResultBase);

        let rewards = unmarshal(self.region(reward_base)?, &self.layout, n_agents, n_objects)?;
        let solution = AuctionSolver::new().solve(&rewards)?;

        let mut slots = solution.assignment.as_slice().to_vec();
        if self.faults.shift_to_unassigned && !shift_to_equal_unassigned(&mut slots, &rewards) {
            debug!("No equally valued unassigned object to shift to");
        }
        let mut agents: Vec<u64> = slots
            .iter()
            .map(|slot| slot.map_or(0, |a| a as u64))
            .collect();
        if let Some((a, b)) = self.faults.swap_objects {
            if a < n_objects && b < n_objects {
                agents.swap(a, b);
            }
        }
        let result = encode_result(&agents, &solution.prices, &self.layout);

        let region = self
            .memory
            .get_mut(&result_base)
            .ok_or_else(|| AuctionError::platform(format!("no device buffer at {result_base:#x}")))?;
        if result.len() > region.len() {
            return Err(AuctionError::platform(format!(
                "result needs {} bytes, buffer at {result_base:#x} holds {}",
                result.len(),
                region.len()
            )));
        }
        region[..result.len()].copy_from_slice(&result);

        let cycle_slot = Register::CycleCount.slots()[0];
        self.regs[cycle_slot] = u32::try_from(solution.bids).unwrap_or(u32::MAX);
        self.countdown = (!self.faults.never_finish).then_some(self.finish_after);
        self.runs += 1;
        debug!(
            "Virtual accelerator solved {n_agents}×{n_objects} in {} bids",
            solution.bids
        );
        Ok(())
    }
}

/// Move one agent to an unassigned object it values exactly as much as its
/// current one. Returns whether a move was made.
fn shift_to_equal_unassigned(slots: &mut [Option<usize>], rewards: &RewardMatrix) -> bool {
    let free: Vec<usize> = (0..slots.len()).filter(|&o| slots[o].is_none()).collect();
    for object in 0..slots.len() {
        let Some(agent) = slots[object] else {
            continue;
        };
        let value = rewards.reward(agent, object);
        if let Some(&target) = free.iter().find(|&&o| rewards.reward(agent, o) == value) {
            slots[object] = None;
            slots[target] = Some(agent);
            return true;
        }
    }
    false
}

impl Platform for SoftwarePlatform {
    fn attach(&mut self, name: &str) -> Result<()> {
        if self.attached {
            return Err(AuctionError::platform("accelerator already bound"));
        }
        if name != ACCELERATOR_NAME {
            return Err(AuctionError::platform(format!(
                "no accelerator named {name:?} (available: {ACCELERATOR_NAME:?})"
            )));
        }
        self.regs = [0; SLOT_COUNT];
        self.regs[Register::Signature.slots()[0]] =
            self.faults.signature.unwrap_or(regs::SIGNATURE_MAGIC);
        self.countdown = None;
        self.attached = true;
        info!("Virtual accelerator bound as {name}");
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.attached = false;
        Ok(())
    }

    fn read_reg(&mut self, slot: usize) -> Result<u32> {
        self.check_slot(slot)?;
        if slot == Register::Finished.slots()[0] {
            if let Some(left) = self.countdown {
                if left <= 1 {
                    self.regs[slot] = regs::finished::DONE;
                    self.countdown = None;
                } else {
                    self.countdown = Some(left - 1);
                }
            }
        }
        Ok(self.regs[slot])
    }

    fn write_reg(&mut self, slot: usize, value: u32) -> Result<()> {
        self.check_slot(slot)?;
        self.write_log.push((slot, value));
        let previous = std::mem::replace(&mut self.regs[slot], value);
        if slot == Register::Start.slots()[0]
            && previous == regs::start::CLEAR
            && value == regs::start::ASSERT
        {
            self.regs[Register::Finished.slots()[0]] = 0;
            self.countdown = None;
            if let Err(e) = self.run() {
                warn!("Virtual accelerator run failed, finished will not rise: {e}");
                self.last_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    fn alloc(&mut self, len: usize) -> Result<DeviceBuffer> {
        if len == 0 {
            return Err(AuctionError::platform("zero-sized device buffer"));
        }
        let addr = self.next_addr;
        let span = (len as u64).div_ceil(ALIGN) * ALIGN;
        self.next_addr += span;
        self.memory.insert(addr, vec![0; len]);
        debug!("Allocated {len} bytes at {addr:#x}");
        Ok(DeviceBuffer::new(addr, len))
    }

    fn free(&mut self, buffer: DeviceBuffer) -> Result<()> {
        self.memory
            .remove(&buffer.addr())
            .map(|_| ())
            .ok_or_else(|| {
                AuctionError::platform(format!("double free of device buffer {:#x}", buffer.addr()))
            })
    }

    fn copy_to_device(&mut self, src: &[u8], dst: &DeviceBuffer) -> Result<()> {
        let region = self
            .memory
            .get_mut(&dst.addr())
            .ok_or_else(|| AuctionError::platform(format!("no device buffer at {:#x}", dst.addr())))?;
        if src.len() > region.len() {
            return Err(AuctionError::platform(format!(
                "{} bytes do not fit buffer of {}",
                src.len(),
                region.len()
            )));
        }
        region[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_from_device(&mut self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<()> {
        let region = self.region(src.addr())?;
        if dst.len() > region.len() {
            return Err(AuctionError::platform(format!(
                "cannot read {} bytes from buffer of {}",
                dst.len(),
                region.len()
            )));
        }
        dst.copy_from_slice(&region[..dst.len()]);
        Ok(())
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Software
    }
}
