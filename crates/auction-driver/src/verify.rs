// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware result verification.
//!
//! An accelerator result is correct when it is an optimal assignment, not
//! when it equals the reference bit for bit: optimal assignments share
//! their total gain but not necessarily their mapping. [`verify`] therefore
//! accepts any per-object disagreement as long as the hardware assignment
//! realises the same gain as the reference and gives no agent two objects.
//!
//! Under [`HardwareSentinel::Zero`] a raw `0` may mean agent 0 or nobody,
//! so agent 0 appearing on several objects is not proof of an infeasible
//! result; [`verify_resolved`] and [`verify_raw`] leave it to the gain.

use crate::assignment::{Assignment, HardwareAssignment, HardwareSentinel};
use crate::error::Result;
use crate::matrix::RewardMatrix;
use std::fmt;
use tracing::{error, info, warn};

/// How a hardware assignment relates to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Same agent for every object.
    Identical,
    /// Different mapping with the same total gain.
    AlternateOptimum {
        /// Gain shared by both assignments.
        gain: u64,
    },
    /// Different mapping with a different total gain.
    GainMismatch {
        /// Reference gain.
        software: u64,
        /// Hardware gain.
        hardware: u64,
    },
    /// The hardware gave one agent two objects.
    InfeasibleHardware {
        /// Agent assigned twice.
        agent: usize,
        /// First object holding the agent.
        first: usize,
        /// Second object holding the agent.
        second: usize,
    },
}

impl Verdict {
    /// Whether the hardware result is accepted.
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Identical | Self::AlternateOptimum { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identical => write!(f, "identical"),
            Self::AlternateOptimum { gain } => write!(f, "alternate optimum (gain {gain})"),
            Self::GainMismatch { software, hardware } => {
                write!(f, "gain mismatch (software {software}, hardware {hardware})")
            }
            Self::InfeasibleHardware {
                agent,
                first,
                second,
            } => write!(f, "agent {agent} assigned to objects {first} and {second}"),
        }
    }
}

/// Outcome of comparing a hardware assignment with the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonResult {
    /// Overall judgement.
    pub verdict: Verdict,
    /// Objects whose agents differ.
    pub mismatches: Vec<usize>,
    /// Gain of the reference assignment.
    pub software_gain: u64,
    /// Gain of the hardware assignment.
    pub hardware_gain: u64,
}

impl ComparisonResult {
    /// Whether the hardware result is accepted.
    pub const fn is_valid(&self) -> bool {
        self.verdict.is_valid()
    }
}

/// Compare `hardware` against the `software` reference on `rewards`.
///
/// # Errors
///
/// Returns error if either assignment does not fit `rewards`.
pub fn verify(
    rewards: &RewardMatrix,
    software: &Assignment,
    hardware: &Assignment,
) -> Result<ComparisonResult> {
    compare(rewards, software, hardware, None)
}

/// Compare a `hardware` assignment resolved from words encoded with
/// `sentinel` against the `software` reference.
///
/// # Errors
///
/// Returns error if either assignment does not fit `rewards`.
pub fn verify_resolved(
    rewards: &RewardMatrix,
    software: &Assignment,
    hardware: &Assignment,
    sentinel: HardwareSentinel,
) -> Result<ComparisonResult> {
    let ambiguous = match sentinel {
        HardwareSentinel::Zero => Some(0),
        HardwareSentinel::Value(_) => None,
    };
    compare(rewards, software, hardware, ambiguous)
}

/// Resolve raw hardware words against the reference, then
/// [`verify_resolved`].
///
/// # Errors
///
/// Returns error if the raw words are malformed or either assignment does
/// not fit `rewards`.
pub fn verify_raw(
    rewards: &RewardMatrix,
    software: &Assignment,
    hardware: &HardwareAssignment,
) -> Result<ComparisonResult> {
    let resolved = hardware.resolve(software, rewards.n_agents())?;
    verify_resolved(rewards, software, &resolved, hardware.sentinel())
}

/// `ambiguous` names an agent whose repeats say nothing about feasibility.
fn compare(
    rewards: &RewardMatrix,
    software: &Assignment,
    hardware: &Assignment,
    ambiguous: Option<usize>,
) -> Result<ComparisonResult> {
    let software_gain = software.gain(rewards)?;
    let hardware_gain = hardware.gain(rewards)?;

    let mismatches: Vec<usize> = software
        .as_slice()
        .iter()
        .zip(hardware.as_slice())
        .enumerate()
        .filter(|(_, (sw, hw))| sw != hw)
        .map(|(object, _)| object)
        .collect();

    for &object in &mismatches {
        warn!(
            "Object {object}: software {} hardware {}",
            fmt_agent(software.agent(object)),
            fmt_agent(hardware.agent(object))
        );
    }

    let verdict = if mismatches.is_empty() {
        Verdict::Identical
    } else if let Some((agent, first, second)) = hardware
        .duplicates()
        .find(|&(agent, ..)| Some(agent) != ambiguous)
    {
        error!("Hardware assigned agent {agent} to objects {first} and {second}");
        Verdict::InfeasibleHardware {
            agent,
            first,
            second,
        }
    } else if software_gain == hardware_gain {
        info!(
            "{} objects differ but both assignments gain {software_gain}: alternate optimum",
            mismatches.len()
        );
        Verdict::AlternateOptimum {
            gain: software_gain,
        }
    } else {
        error!("Gain mismatch: software {software_gain}, hardware {hardware_gain}");
        Verdict::GainMismatch {
            software: software_gain,
            hardware: hardware_gain,
        }
    };

    Ok(ComparisonResult {
        verdict,
        mismatches,
        software_gain,
        hardware_gain,
    })
}

fn fmt_agent(agent: Option<usize>) -> String {
    agent.map_or_else(|| "unassigned".to_string(), |a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{AuctionSolver, ReferenceSolver};
    use proptest::prelude::*;

    fn diagonal() -> RewardMatrix {
        RewardMatrix::from_rows(vec![vec![10, 0], vec![0, 10]]).unwrap()
    }

    fn slots(v: &[Option<usize>]) -> Assignment {
        Assignment::new(v.to_vec())
    }

    #[test]
    fn identical_assignment_is_valid() {
        let sw = slots(&[Some(0), Some(1)]);
        let result = verify(&diagonal(), &sw, &sw.clone()).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.verdict, Verdict::Identical);
        assert_eq!(result.software_gain, 20);
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn crossed_assignment_is_a_gain_mismatch() {
        let sw = slots(&[Some(0), Some(1)]);
        let hw = slots(&[Some(1), Some(0)]);
        let result = verify(&diagonal(), &sw, &hw).unwrap();
        assert!(!result.is_valid());
        assert_eq!(
            result.verdict,
            Verdict::GainMismatch {
                software: 20,
                hardware: 0
            }
        );
        assert_eq!(result.mismatches, vec![0, 1]);
    }

    #[test]
    fn equal_gain_is_an_alternate_optimum() {
        let m = RewardMatrix::from_rows(vec![vec![5, 5], vec![5, 5]]).unwrap();
        let sw = slots(&[Some(0), Some(1)]);
        let hw = slots(&[Some(1), Some(0)]);
        let result = verify(&m, &sw, &hw).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.verdict, Verdict::AlternateOptimum { gain: 10 });
        assert_eq!(result.mismatches, vec![0, 1]);
    }

    #[test]
    fn duplicate_agent_rejected_even_at_equal_gain() {
        let m = RewardMatrix::from_rows(vec![vec![0, 3], vec![3, 3]]).unwrap();
        let sw = slots(&[Some(1), Some(0)]);
        let hw = slots(&[Some(1), Some(1)]);
        let result = verify(&m, &sw, &hw).unwrap();
        assert_eq!(result.software_gain, result.hardware_gain);
        assert_eq!(
            result.verdict,
            Verdict::InfeasibleHardware {
                agent: 1,
                first: 0,
                second: 1
            }
        );
        assert!(!result.is_valid());
    }

    #[test]
    fn zero_word_matches_unassigned_reference() {
        let m = RewardMatrix::from_rows(vec![vec![10, 0, 0], vec![0, 10, 0]]).unwrap();
        let sw = Assignment::from_signed(&[0, 1, -1]).unwrap();
        let hw = HardwareAssignment::new(vec![0, 1, 0], HardwareSentinel::Zero);
        let result = verify_raw(&m, &sw, &hw).unwrap();
        assert_eq!(result.verdict, Verdict::Identical);
        assert_eq!(result.software_gain, 20);
    }

    #[test]
    fn nonzero_word_against_unassigned_reference_is_a_mismatch() {
        let m = RewardMatrix::from_rows(vec![vec![10, 0], vec![0, 0]]).unwrap();
        let sw = Assignment::from_signed(&[0, -1]).unwrap();
        let hw = HardwareAssignment::new(vec![0, 1], HardwareSentinel::Zero);
        let result = verify_raw(&m, &sw, &hw).unwrap();
        assert_eq!(result.mismatches, vec![1]);
        // Agent 1 on object 1 adds nothing, so the gains agree.
        assert_eq!(result.verdict, Verdict::AlternateOptimum { gain: 10 });
    }

    #[test]
    fn hardware_leaving_a_different_object_unassigned_is_accepted() {
        // Agent 1 values objects 1 and 2 equally. The reference takes 1,
        // the accelerator takes 2 and reports object 1 as 0.
        let m = RewardMatrix::from_rows(vec![vec![10, 0, 0], vec![0, 10, 10]]).unwrap();
        let sw = Assignment::from_signed(&[0, 1, -1]).unwrap();
        let hw = HardwareAssignment::new(vec![0, 0, 1], HardwareSentinel::Zero);
        let result = verify_raw(&m, &sw, &hw).unwrap();
        assert_eq!(result.verdict, Verdict::AlternateOptimum { gain: 20 });
        assert_eq!(result.mismatches, vec![1, 2]);
        assert!(result.is_valid());
    }

    #[test]
    fn repeated_agent_zero_left_to_the_gain() {
        // Object 1 read as agent 0 adds 7, so the gains differ.
        let m = RewardMatrix::from_rows(vec![vec![10, 7, 0], vec![0, 10, 10]]).unwrap();
        let sw = Assignment::from_signed(&[0, 1, -1]).unwrap();
        let hw = HardwareAssignment::new(vec![0, 0, 1], HardwareSentinel::Zero);
        let result = verify_raw(&m, &sw, &hw).unwrap();
        assert_eq!(
            result.verdict,
            Verdict::GainMismatch {
                software: 20,
                hardware: 27
            }
        );
    }

    #[test]
    fn dedicated_sentinel_keeps_agent_zero_repeats_infeasible() {
        let m = RewardMatrix::from_rows(vec![vec![5, 5], vec![5, 5]]).unwrap();
        let sw = slots(&[Some(0), Some(1)]);
        let hw = HardwareAssignment::new(vec![0, 0], HardwareSentinel::Value(u64::MAX));
        let result = verify_raw(&m, &sw, &hw).unwrap();
        assert_eq!(
            result.verdict,
            Verdict::InfeasibleHardware {
                agent: 0,
                first: 0,
                second: 1
            }
        );
    }

    #[test]
    fn shape_errors_propagate() {
        let sw = slots(&[Some(0)]);
        assert!(verify(&diagonal(), &sw, &sw.clone()).is_err());
    }

    fn partial_assignment(perm: &[usize], keep: &[bool]) -> Assignment {
        Assignment::new(
            keep.iter()
                .enumerate()
                .map(|(o, &k)| if k { perm.get(o).copied() } else { None })
                .collect(),
        )
    }

    fn encode_zero(a: &Assignment) -> HardwareAssignment {
        let words = a.as_slice().iter().map(|s| s.map_or(0, |x| x as u64)).collect();
        HardwareAssignment::new(words, HardwareSentinel::Zero)
    }

    fn problems() -> impl Strategy<Value = (RewardMatrix, Vec<usize>, Vec<bool>)> {
        (1usize..=4, 1usize..=4).prop_flat_map(|(a, o)| {
            (
                prop::collection::vec(0u64..=6, a * o)
                    .prop_map(move |v| RewardMatrix::from_flat(a, o, v).unwrap()),
                Just((0..a).collect::<Vec<_>>()).prop_shuffle(),
                prop::collection::vec(any::<bool>(), o),
            )
        })
    }

    proptest! {
        #[test]
        fn feasible_results_are_judged_by_gain_alone((m, perm, keep) in problems()) {
            let sw = AuctionSolver::new().solve(&m).unwrap().assignment;
            let hw = partial_assignment(&perm, &keep);
            let result = verify(&m, &sw, &hw).unwrap();
            let is_infeasible = matches!(result.verdict, Verdict::InfeasibleHardware { .. });
            prop_assert!(!is_infeasible);
            prop_assert_eq!(result.is_valid(), hw.gain(&m).unwrap() == result.software_gain);
        }

        #[test]
        fn zero_encoded_results_are_never_infeasible((m, perm, keep) in problems()) {
            let sw = AuctionSolver::new().solve(&m).unwrap().assignment;
            let hw = encode_zero(&partial_assignment(&perm, &keep));
            let result = verify_raw(&m, &sw, &hw).unwrap();
            let is_infeasible = matches!(result.verdict, Verdict::InfeasibleHardware { .. });
            prop_assert!(!is_infeasible);
            prop_assert_eq!(result.is_valid(), result.hardware_gain == result.software_gain);
        }

        #[test]
        fn reference_encoded_as_hardware_words_is_identical((m, _perm, _keep) in problems()) {
            let sw = AuctionSolver::new().solve(&m).unwrap().assignment;
            let result = verify_raw(&m, &sw, &encode_zero(&sw)).unwrap();
            prop_assert_eq!(result.verdict, Verdict::Identical);
        }
    }
}
