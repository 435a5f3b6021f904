// SPDX-License-Identifier: AGPL-3.0-only

//! Buffer marshalling between host structures and accelerator memory.
//!
//! Reward buffers are written row by row at the layout's fixed stride;
//! result buffers are decoded from `2 × n_objects` little-endian words.
//! Size and stride checks run before the first byte is written, so a
//! rejected matrix never yields a partial buffer.

use crate::error::{AuctionError, Result};
use crate::matrix::RewardMatrix;
use auction_chip::layout::{BufferLayout, WordWidth};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Reward matrix laid out for the accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedBuffer {
    bytes: Bytes,
    layout: BufferLayout,
    n_agents: usize,
    n_objects: usize,
}

impl AlignedBuffer {
    /// Buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes to allocate on the device.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no rows.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Layout the buffer was written with.
    pub const fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Agent count of the marshalled matrix.
    pub const fn n_agents(&self) -> usize {
        self.n_agents
    }

    /// Object count of the marshalled matrix.
    pub const fn n_objects(&self) -> usize {
        self.n_objects
    }

    /// Shared handle to the contents.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

/// Bytes `rewards` needs under `layout`, after stride and capacity checks.
///
/// # Errors
///
/// Returns [`AuctionError::ObjectsExceedStride`] or
/// [`AuctionError::CapacityExceeded`].
pub fn required_bytes(rewards: &RewardMatrix, layout: &BufferLayout) -> Result<usize> {
    if rewards.n_objects() > layout.row_stride {
        return Err(AuctionError::ObjectsExceedStride {
            objects: rewards.n_objects(),
            stride: layout.row_stride,
        });
    }
    let required = layout
        .reward_bytes(rewards.n_agents())
        .unwrap_or(usize::MAX);
    if required > layout.capacity_bytes {
        return Err(AuctionError::CapacityExceeded {
            required,
            capacity: layout.capacity_bytes,
        });
    }
    Ok(required)
}

/// Lay `rewards` out for the accelerator.
///
/// # Errors
///
/// Returns error if the matrix does not fit the layout; nothing is
/// produced in that case.
#[allow(clippy::cast_possible_truncation)]
pub fn marshal(rewards: &RewardMatrix, layout: &BufferLayout) -> Result<AlignedBuffer> {
    let size = required_bytes(rewards, layout)?;
    let limit = layout.element.max_value();
    let mut truncated = 0usize;
    let mut buf = BytesMut::with_capacity(size);

    for row in rewards.rows() {
        for &value in row {
            if value > limit {
                truncated += 1;
            }
            put_word(&mut buf, layout.element, value);
        }
        let pad = (layout.row_stride - row.len()) * layout.element.bytes();
        buf.put_bytes(0, pad);
    }
    debug_assert_eq!(buf.len(), size);

    if truncated > 0 {
        warn!(
            "{truncated} rewards exceed the {}-byte element width and were truncated",
            layout.element.bytes()
        );
    }
    debug!(
        "Marshalled {}×{} rewards into {size} bytes (stride {})",
        rewards.n_agents(),
        rewards.n_objects(),
        layout.row_stride
    );

    Ok(AlignedBuffer {
        bytes: buf.freeze(),
        layout: *layout,
        n_agents: rewards.n_agents(),
        n_objects: rewards.n_objects(),
    })
}

/// Read a reward buffer back into a matrix, dropping the row padding.
///
/// # Errors
///
/// Returns error if `bytes` is shorter than `n_agents` rows or the
/// dimensions do not fit the layout.
pub fn unmarshal(
    bytes: &[u8],
    layout: &BufferLayout,
    n_agents: usize,
    n_objects: usize,
) -> Result<RewardMatrix> {
    if n_objects > layout.row_stride {
        return Err(AuctionError::ObjectsExceedStride {
            objects: n_objects,
            stride: layout.row_stride,
        });
    }
    let needed = layout.reward_bytes(n_agents).unwrap_or(usize::MAX);
    if bytes.len() < needed {
        return Err(AuctionError::malformed_buffer(format!(
            "reward buffer has {} bytes, {n_agents} rows need {needed}",
            bytes.len()
        )));
    }
    let mut rewards = Vec::with_capacity(n_agents * n_objects);
    for row in bytes[..needed].chunks_exact(layout.row_bytes()) {
        let mut row = row;
        for _ in 0..n_objects {
            rewards.push(get_word(&mut row, layout.element));
        }
    }
    RewardMatrix::from_flat(n_agents, n_objects, rewards)
}

/// Words read back from a result buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultWords {
    /// Raw agent word per object.
    pub agents: Vec<u64>,
    /// Final price per object.
    pub prices: Vec<u64>,
}

/// Decode a result buffer of `2 × n_objects` words.
///
/// # Errors
///
/// Returns error if `bytes` is shorter than the layout requires.
pub fn decode_result(bytes: &[u8], layout: &BufferLayout, n_objects: usize) -> Result<ResultWords> {
    let needed = layout.result_bytes(n_objects);
    if bytes.len() < needed {
        return Err(AuctionError::malformed_buffer(format!(
            "result buffer has {} bytes, {n_objects} objects need {needed}",
            bytes.len()
        )));
    }
    let mut cursor = &bytes[..needed];
    let agents = (0..n_objects)
        .map(|_| get_word(&mut cursor, layout.result_word))
        .collect();
    let prices = (0..n_objects)
        .map(|_| get_word(&mut cursor, layout.result_word))
        .collect();
    Ok(ResultWords { agents, prices })
}

/// Encode a result buffer the way the accelerator writes it.
pub fn encode_result(agents: &[u64], prices: &[u64], layout: &BufferLayout) -> Bytes {
    let mut buf = BytesMut::with_capacity((agents.len() + prices.len()) * layout.result_word.bytes());
    for &word in agents.iter().chain(prices) {
        put_word(&mut buf, layout.result_word, word);
    }
    buf.freeze()
}

#[allow(clippy::cast_possible_truncation)]
fn put_word(buf: &mut BytesMut, width: WordWidth, value: u64) {
    match width {
        WordWidth::Bits8 => buf.put_u8(value as u8),
        WordWidth::Bits32 => buf.put_u32_le(value as u32),
        WordWidth::Bits64 => buf.put_u64_le(value),
    }
}

fn get_word(buf: &mut &[u8], width: WordWidth) -> u64 {
    match width {
        WordWidth::Bits8 => u64::from(buf.get_u8()),
        WordWidth::Bits32 => u64::from(buf.get_u32_le()),
        WordWidth::Bits64 => buf.get_u64_le(),
    }
}
