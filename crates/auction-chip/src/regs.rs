// SPDX-License-Identifier: AGPL-3.0-only

//! Register file of the auction accelerator.
//!
//! Every register is a 32-bit word addressed by slot index. Values wider
//! than 32 bits (the two buffer base addresses) occupy two consecutive
//! slots, high half first.
//!
//! ```text
//! slot  name               direction  contents
//! ────  ─────────────────  ─────────  ──────────────────────────────────────
//!  0    signature          identity   0x1159cc0f when the auction image is loaded
//!  1-2  rfIn_baseAddrRes   input      result buffer address (hi, lo)
//!  3    rfIn_nObjects      input      number of objects (columns)
//!  4    rfIn_nAgents       input      number of agents (rows)
//!  5-6  rfIn_baseAddr      input      reward buffer address (hi, lo)
//!  7    rfIn_start         input      start strobe
//!  8    rfOut_cycleCount   output     cycles spent on the last run
//!  9    rfOut_finished     output     1 once the result buffer is written
//! ```

/// Value of the signature register for the auction bitfile.
pub const SIGNATURE_MAGIC: u32 = 0x1159_cc0f;

/// Number of physical register slots.
pub const SLOT_COUNT: usize = 10;

/// Start strobe values.
pub mod start {
    /// Assert start.
    pub const ASSERT: u32 = 1;
    /// Release start (pulse mode only).
    pub const CLEAR: u32 = 0;
}

/// Finished register values.
pub mod finished {
    /// The accelerator has written its result buffer.
    pub const DONE: u32 = 1;
}

/// Role of a register as seen from software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read-only identity value.
    Identity,
    /// Write-only configuration or control.
    Input,
    /// Read-only status or result.
    Output,
}

impl Direction {
    /// Whether software may read registers with this role.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        !matches!(self, Self::Input)
    }

    /// Whether software may write registers with this role.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Input)
    }
}

/// Named registers of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Identity signature.
    Signature,
    /// Result buffer base address (64-bit, split).
    ResultBase,
    /// Object count.
    ObjectCount,
    /// Agent count.
    AgentCount,
    /// Reward buffer base address (64-bit, split).
    RewardBase,
    /// Start strobe.
    Start,
    /// Cycle counter.
    CycleCount,
    /// Completion flag.
    Finished,
}

impl Register {
    /// Every register, in slot order.
    pub const ALL: [Self; 8] = [
        Self::Signature,
        Self::ResultBase,
        Self::ObjectCount,
        Self::AgentCount,
        Self::RewardBase,
        Self::Start,
        Self::CycleCount,
        Self::Finished,
    ];

    /// Name as exported by the bitfile's register-file generator.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::ResultBase => "rfIn_baseAddrRes",
            Self::ObjectCount => "rfIn_nObjects",
            Self::AgentCount => "rfIn_nAgents",
            Self::RewardBase => "rfIn_baseAddr",
            Self::Start => "rfIn_start",
            Self::CycleCount => "rfOut_cycleCount",
            Self::Finished => "rfOut_finished",
        }
    }

    /// Role of the register.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Signature => Direction::Identity,
            Self::ResultBase
            | Self::ObjectCount
            | Self::AgentCount
            | Self::RewardBase
            | Self::Start => Direction::Input,
            Self::CycleCount | Self::Finished => Direction::Output,
        }
    }

    /// Physical slots backing the register. Split registers list the
    /// high half first, which is also the order they must be written in.
    #[must_use]
    pub const fn slots(self) -> &'static [usize] {
        match self {
            Self::Signature => &[0],
            Self::ResultBase => &[1, 2],
            Self::ObjectCount => &[3],
            Self::AgentCount => &[4],
            Self::RewardBase => &[5, 6],
            Self::Start => &[7],
            Self::CycleCount => &[8],
            Self::Finished => &[9],
        }
    }

    /// The single slot of a 32-bit register, `None` for split registers.
    #[must_use]
    pub fn slot(self) -> Option<usize> {
        match self.slots() {
            [slot] => Some(*slot),
            _ => None,
        }
    }

    /// Whether the register carries a 64-bit value across two slots.
    #[must_use]
    pub const fn is_split(self) -> bool {
        self.slots().len() == 2
    }

    /// Look a register up by its exported name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Split a 64-bit value into `(high, low)` register words.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn split_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// Join `(high, low)` register words into a 64-bit value.
#[must_use]
pub const fn join_u64(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cover_the_register_file_once() {
        let mut seen = [false; SLOT_COUNT];
        for reg in Register::ALL {
            for &slot in reg.slots() {
                assert!(!seen[slot], "slot {slot} mapped twice");
                seen[slot] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn split_registers_are_the_two_base_addresses() {
        let split: Vec<_> = Register::ALL.into_iter().filter(|r| r.is_split()).collect();
        assert_eq!(split, vec![Register::ResultBase, Register::RewardBase]);
        assert_eq!(Register::ResultBase.slot(), None);
        assert_eq!(Register::Finished.slot(), Some(9));
    }

    #[test]
    fn names_round_trip() {
        for reg in Register::ALL {
            assert_eq!(Register::from_name(reg.name()), Some(reg));
        }
        assert_eq!(Register::from_name("rfOut_prices"), None);
    }

    #[test]
    fn only_inputs_are_writable() {
        assert!(Register::Signature.direction().is_readable());
        assert!(!Register::Signature.direction().is_writable());
        assert!(Register::Start.direction().is_writable());
        assert!(!Register::Start.direction().is_readable());
        assert!(Register::CycleCount.direction().is_readable());
    }

    #[test]
    fn split_and_join_are_inverse() {
        let addr = 0x0000_0007_dead_b000_u64;
        let (hi, lo) = split_u64(addr);
        assert_eq!(hi, 0x7);
        assert_eq!(lo, 0xdead_b000);
        assert_eq!(join_u64(hi, lo), addr);
    }
}
