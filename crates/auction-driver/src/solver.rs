// SPDX-License-Identifier: AGPL-3.0-only

//! Software reference solver.
//!
//! [`AuctionSolver`] runs a forward auction, one bidder at a time, over
//! integer rewards. Each agent also owns a private zero-valued dummy object,
//! so leaving an agent unassigned is always a legal bid and rectangular
//! problems need no padding. Rewards are scaled by `n_agents + 1` and bids
//! use an increment of 1, which makes the final assignment exactly optimal.

use crate::assignment::Assignment;
use crate::error::{AuctionError, Result};
use crate::matrix::RewardMatrix;
use std::collections::VecDeque;
use tracing::debug;

/// Outcome of a reference solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionSolution {
    /// Agent per object.
    pub assignment: Assignment,
    /// Final price per object, in reward units (rounded down).
    pub prices: Vec<u64>,
    /// Number of bids placed.
    pub bids: u64,
}

/// Something that produces the reference assignment for a reward matrix.
pub trait ReferenceSolver {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Solve `rewards`.
    ///
    /// # Errors
    ///
    /// Returns error if the matrix cannot be solved.
    fn solve(&self, rewards: &RewardMatrix) -> Result<AuctionSolution>;
}

/// Forward auction with private dummy objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionSolver {
    max_bids: Option<u64>,
}

impl AuctionSolver {
    /// Solver with no bid limit.
    pub const fn new() -> Self {
        Self { max_bids: None }
    }

    /// Give up after `max_bids` bids.
    #[must_use]
    pub const fn with_max_bids(mut self, max_bids: u64) -> Self {
        self.max_bids = Some(max_bids);
        self
    }
}

impl ReferenceSolver for AuctionSolver {
    fn name(&self) -> &'static str {
        "auction"
    }

    fn solve(&self, rewards: &RewardMatrix) -> Result<AuctionSolution> {
        let n_agents = rewards.n_agents();
        let n_objects = rewards.n_objects();
        let scale = i128::try_from(n_agents + 1)
            .map_err(|_| AuctionError::invalid_problem("too many agents"))?;

        let mut prices = vec![0i128; n_objects];
        let mut owner: Vec<Option<usize>> = vec![None; n_objects];
        let mut queue: VecDeque<usize> = (0..n_agents).collect();
        let mut bids = 0u64;

        while let Some(agent) = queue.pop_front() {
            if self.max_bids.is_some_and(|max| bids >= max) {
                return Err(AuctionError::invalid_problem(format!(
                    "no convergence after {bids} bids"
                )));
            }

            // The dummy is worth 0 and serves as both the initial best and
            // second-best value.
            let mut best = 0i128;
            let mut best_object = None;
            let mut second = 0i128;
            for (object, &reward) in rewards.row(agent).iter().enumerate() {
                if reward == 0 {
                    continue;
                }
                let value = i128::from(reward) * scale - prices[object];
                if value > best {
                    second = best;
                    best = value;
                    best_object = Some(object);
                } else if value > second {
                    second = value;
                }
            }

            let Some(object) = best_object else {
                continue;
            };
            prices[object] += best - second + 1;
            if let Some(outbid) = owner[object].replace(agent) {
                queue.push_back(outbid);
            }
            bids += 1;
        }

        let assignment = Assignment::new(owner);
        debug!(
            "Auction solved {n_agents}×{n_objects} in {bids} bids, {} objects assigned",
            assignment.assigned_count()
        );
        Ok(AuctionSolution {
            assignment,
            prices: prices
                .into_iter()
                .map(|p| u64::try_from(p / scale).unwrap_or(u64::MAX))
                .collect(),
            bids,
        })
    }
}
