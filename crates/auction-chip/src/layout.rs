// SPDX-License-Identifier: AGPL-3.0-only

//! Memory layouts the accelerator reads and writes.
//!
//! The reward matrix is read row by row (one row per agent) with a fixed
//! row stride, independent of the object count; unused columns are zero.
//! Two bitfile generations exist:
//!
//! ```text
//! mode    element  stride  capacity  result word
//! ──────  ───────  ──────  ────────  ───────────
//! Narrow  u8       16      16 KiB    u32
//! Wide    u64      64      64 KiB    u64
//! ```
//!
//! The result buffer holds `2 × n_objects` result words: the agent assigned
//! to each object (0 when none), followed by the final price of each object.

/// Width of one word in a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWidth {
    /// 8-bit word.
    Bits8,
    /// 32-bit word.
    Bits32,
    /// 64-bit word.
    Bits64,
}

impl WordWidth {
    /// Bytes per word.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Largest value representable in one word.
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::Bits8 => u8::MAX as u64,
            Self::Bits32 => u32::MAX as u64,
            Self::Bits64 => u64::MAX,
        }
    }
}

/// Layout of the reward and result buffers for one bitfile generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Width of one reward element.
    pub element: WordWidth,
    /// Elements per row, including zero padding.
    pub row_stride: usize,
    /// Hard ceiling on the reward buffer size in bytes.
    pub capacity_bytes: usize,
    /// Width of one result word.
    pub result_word: WordWidth,
}

impl BufferLayout {
    /// 8-bit rewards, 16-element rows, 16 KiB buffer.
    pub const NARROW: Self = Self {
        element: WordWidth::Bits8,
        row_stride: 16,
        capacity_bytes: 16 * 1024,
        result_word: WordWidth::Bits32,
    };

    /// 64-bit rewards, 64-element rows, 64 KiB buffer.
    pub const WIDE: Self = Self {
        element: WordWidth::Bits64,
        row_stride: 64,
        capacity_bytes: 64 * 1024,
        result_word: WordWidth::Bits64,
    };

    /// Bytes occupied by one padded row.
    #[must_use]
    pub const fn row_bytes(&self) -> usize {
        self.row_stride * self.element.bytes()
    }

    /// Reward buffer size for `n_agents` rows. `None` on overflow.
    #[must_use]
    pub const fn reward_bytes(&self, n_agents: usize) -> Option<usize> {
        n_agents.checked_mul(self.row_bytes())
    }

    /// Largest agent count that fits the capacity.
    #[must_use]
    pub const fn max_agents(&self) -> usize {
        self.capacity_bytes / self.row_bytes()
    }

    /// Result buffer size for `n_objects` objects.
    #[must_use]
    pub const fn result_bytes(&self, n_objects: usize) -> usize {
        2 * n_objects * self.result_word.bytes()
    }
}

/// Named bitfile generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// [`BufferLayout::NARROW`].
    Narrow,
    /// [`BufferLayout::WIDE`].
    #[default]
    Wide,
}

impl LayoutMode {
    /// The concrete layout for this generation.
    #[must_use]
    pub const fn layout(self) -> BufferLayout {
        match self {
            Self::Narrow => BufferLayout::NARROW,
            Self::Wide => BufferLayout::WIDE,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Narrow => "narrow",
            Self::Wide => "wide",
        }
    }

    /// Parse `narrow` or `wide` (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "narrow" | "8" | "u8" => Some(Self::Narrow),
            "wide" | "64" | "u64" => Some(Self::Wide),
            _ => None,
        }
    }
}
