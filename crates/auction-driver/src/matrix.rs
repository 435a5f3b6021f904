// SPDX-License-Identifier: AGPL-3.0-only

//! Reward matrix of an assignment problem.

use crate::error::{AuctionError, Result};

/// Rewards of an assignment problem, one row per agent and one column per
/// object. Rectangular and immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardMatrix {
    n_agents: usize,
    n_objects: usize,
    /// Row-major, `n_agents × n_objects`
    rewards: Vec<u64>,
}

impl RewardMatrix {
    /// Build from rows.
    ///
    /// # Errors
    ///
    /// Returns error if there are no rows, no columns, or rows differ in length.
    pub fn from_rows(rows: Vec<Vec<u64>>) -> Result<Self> {
        let n_agents = rows.len();
        let n_objects = rows.first().map_or(0, Vec::len);
        if n_agents == 0 || n_objects == 0 {
            return Err(AuctionError::invalid_problem("reward matrix is empty"));
        }
        if let Some((agent, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_objects) {
            return Err(AuctionError::invalid_problem(format!(
                "row {agent} has {} rewards, expected {n_objects}",
                row.len()
            )));
        }
        Ok(Self {
            n_agents,
            n_objects,
            rewards: rows.into_iter().flatten().collect(),
        })
    }

    /// Build from a row-major slice.
    ///
    /// # Errors
    ///
    /// Returns error if a dimension is zero or the slice length is not
    /// `n_agents × n_objects`.
    pub fn from_flat(n_agents: usize, n_objects: usize, rewards: Vec<u64>) -> Result<Self> {
        if n_agents == 0 || n_objects == 0 {
            return Err(AuctionError::invalid_problem("reward matrix is empty"));
        }
        if rewards.len() != n_agents * n_objects {
            return Err(AuctionError::invalid_problem(format!(
                "{} rewards for a {n_agents}×{n_objects} matrix",
                rewards.len()
            )));
        }
        Ok(Self {
            n_agents,
            n_objects,
            rewards,
        })
    }

    /// Number of agents (rows).
    pub const fn n_agents(&self) -> usize {
        self.n_agents
    }

    /// Number of objects (columns).
    pub const fn n_objects(&self) -> usize {
        self.n_objects
    }

    /// Reward for matching `agent` to `object`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn reward(&self, agent: usize, object: usize) -> u64 {
        assert!(object < self.n_objects, "object {object} out of range");
        self.rewards[agent * self.n_objects + object]
    }

    /// Rewards of one agent across all objects.
    pub fn row(&self, agent: usize) -> &[u64] {
        &self.rewards[agent * self.n_objects..(agent + 1) * self.n_objects]
    }

    /// Iterate rows in agent order.
    pub fn rows(&self) -> impl Iterator<Item = &[u64]> + '_ {
        self.rewards.chunks_exact(self.n_objects)
    }

    /// Largest reward in the matrix.
    pub fn max_reward(&self) -> u64 {
        self.rewards.iter().copied().max().unwrap_or(0)
    }
}
