// SPDX-License-Identifier: AGPL-3.0-only

//! Object → agent assignments and their raw encodings.
//!
//! Inside the crate an assignment is always `Option<usize>` per object.
//! The two producers encode "no agent" differently:
//!
//! ```text
//! software reference   signed agent index, -1 = unassigned
//! accelerator          unsigned agent index, 0 = unassigned (collides with agent 0)
//! ```
//!
//! Each encoding is converted exactly once, at the boundary, by
//! [`Assignment::from_signed`] and [`HardwareAssignment::resolve`].

use crate::error::{AuctionError, Result};
use crate::matrix::RewardMatrix;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt;

/// Software encoding of "unassigned".
pub const SOFTWARE_UNASSIGNED: i64 = -1;

/// Agent chosen for each object, `None` when the object is unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assignment(Vec<Option<usize>>);

impl Assignment {
    /// Wrap per-object slots.
    pub fn new(slots: Vec<Option<usize>>) -> Self {
        Self(slots)
    }

    /// Every object unassigned.
    pub fn unassigned(n_objects: usize) -> Self {
        Self(vec![None; n_objects])
    }

    /// Decode the software reference encoding (`-1` = unassigned).
    ///
    /// # Errors
    ///
    /// Returns error on negative values other than `-1`.
    pub fn from_signed(raw: &[i64]) -> Result<Self> {
        raw.iter()
            .enumerate()
            .map(|(object, &v)| match v {
                SOFTWARE_UNASSIGNED => Ok(None),
                v => usize::try_from(v).map(Some).map_err(|_| {
                    AuctionError::invalid_problem(format!("object {object}: invalid agent {v}"))
                }),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Encode for the software reference (`-1` = unassigned).
    pub fn to_signed(&self) -> Vec<i64> {
        self.0
            .iter()
            .map(|slot| slot.map_or(SOFTWARE_UNASSIGNED, |a| a as i64))
            .collect()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no objects.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Agent assigned to `object`.
    pub fn agent(&self, object: usize) -> Option<usize> {
        self.0.get(object).copied().flatten()
    }

    /// Per-object slots.
    pub fn as_slice(&self) -> &[Option<usize>] {
        &self.0
    }

    /// Number of assigned objects.
    pub fn assigned_count(&self) -> usize {
        self.0.iter().flatten().count()
    }

    /// Check the assignment fits `rewards`: one slot per object and every
    /// agent index in range.
    ///
    /// # Errors
    ///
    /// Returns error describing the first violation.
    pub fn check_shape(&self, rewards: &RewardMatrix) -> Result<()> {
        if self.len() != rewards.n_objects() {
            return Err(AuctionError::invalid_problem(format!(
                "assignment covers {} objects, problem has {}",
                self.len(),
                rewards.n_objects()
            )));
        }
        if let Some((object, agent)) = self
            .0
            .iter()
            .enumerate()
            .find_map(|(o, slot)| slot.filter(|&a| a >= rewards.n_agents()).map(|a| (o, a)))
        {
            return Err(AuctionError::invalid_problem(format!(
                "object {object} assigned to agent {agent}, problem has {} agents",
                rewards.n_agents()
            )));
        }
        Ok(())
    }

    /// Every object whose agent already holds an earlier object, as
    /// `(agent, first, second)`.
    pub fn duplicates(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let mut owner = HashMap::new();
        self.0.iter().enumerate().filter_map(move |(object, slot)| {
            let agent = (*slot)?;
            match owner.entry(agent) {
                Entry::Occupied(first) => Some((agent, *first.get(), object)),
                Entry::Vacant(free) => {
                    free.insert(object);
                    None
                }
            }
        })
    }

    /// First agent assigned to two objects, as `(agent, first, second)`.
    pub fn duplicate_agent(&self) -> Option<(usize, usize, usize)> {
        self.duplicates().next()
    }

    /// Total reward realised: `Σ rewards[agent][object]` over assigned objects.
    ///
    /// # Errors
    ///
    /// Returns error if the assignment does not fit `rewards`.
    pub fn gain(&self, rewards: &RewardMatrix) -> Result<u64> {
        self.check_shape(rewards)?;
        Ok(self
            .0
            .iter()
            .enumerate()
            .filter_map(|(object, slot)| slot.map(|agent| rewards.reward(agent, object)))
            .sum())
    }
}

impl From<Vec<Option<usize>>> for Assignment {
    fn from(slots: Vec<Option<usize>>) -> Self {
        Self(slots)
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slot) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match slot {
                Some(agent) => write!(f, "{agent}")?,
                None => f.write_str("-")?,
            }
        }
        Ok(())
    }
}

/// How the accelerator encodes "unassigned" in its result words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareSentinel {
    /// `0` means unassigned, which collides with agent 0.
    #[default]
    Zero,
    /// A dedicated value means unassigned.
    Value(u64),
}

/// Raw agent words read back from the accelerator's result buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareAssignment {
    raw: Vec<u64>,
    sentinel: HardwareSentinel,
}

impl HardwareAssignment {
    /// Wrap raw result words.
    pub fn new(raw: Vec<u64>, sentinel: HardwareSentinel) -> Self {
        Self { raw, sentinel }
    }

    /// Raw result words.
    pub fn raw(&self) -> &[u64] {
        &self.raw
    }

    /// Sentinel in effect.
    pub const fn sentinel(&self) -> HardwareSentinel {
        self.sentinel
    }

    /// Convert to an [`Assignment`].
    ///
    /// Under [`HardwareSentinel::Zero`] a raw `0` is ambiguous; it takes
    /// the software reference's reading for that object when the reference
    /// is unassigned, and means agent 0 otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the word count differs from the reference or a
    /// word names an agent outside `0..n_agents`.
    pub fn resolve(&self, reference: &Assignment, n_agents: usize) -> Result<Assignment> {
        if self.raw.len() != reference.len() {
            return Err(AuctionError::malformed_buffer(format!(
                "{} result words for {} objects",
                self.raw.len(),
                reference.len()
            )));
        }
        self.raw
            .iter()
            .enumerate()
            .map(|(object, &word)| {
                let agent = match self.sentinel {
                    HardwareSentinel::Zero if word == 0 => {
                        return Ok(reference.agent(object).map(|_| 0));
                    }
                    HardwareSentinel::Value(s) if word == s => return Ok(None),
                    _ => word,
                };
                usize::try_from(agent)
                    .ok()
                    .filter(|&a| a < n_agents)
                    .map(Some)
                    .ok_or_else(|| {
                        AuctionError::malformed_buffer(format!(
                            "object {object}: agent {agent} out of range ({n_agents} agents)"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(Assignment)
    }
}
