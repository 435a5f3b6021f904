// SPDX-License-Identifier: AGPL-3.0-only

//! Batch validation tests
//!
//! Runs problem directories end to end against the virtual accelerator.

use auction_driver::chip::BufferLayout;
use auction_driver::{
    problem, BatchReport, Harness, InstanceOutcome, SoftwareFaults, SoftwarePlatform, Verdict,
};
use std::fs;
use std::path::{Path, PathBuf};

fn write_problems(dir: &Path, problems: &[(&str, &str)]) -> Vec<PathBuf> {
    for (name, body) in problems {
        fs::write(dir.join(name), body).unwrap();
    }
    problem::discover(&[dir]).unwrap()
}

fn run(platform: &mut SoftwarePlatform, paths: &[PathBuf], stop: bool) -> BatchReport {
    Harness::new(BufferLayout::WIDE)
        .with_stop_on_failure(stop)
        .run_batch(platform, paths)
}

#[test]
fn clean_batch_passes() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_problems(
        dir.path(),
        &[
            ("p1.csv", "10,0\n0,10\n"),
            ("p2.csv", "5,5\n5,5\n"),
            ("p3.csv", "0,3,7\n4,0,2\n9,9,0\n1,1,1\n"),
            ("p4.csv", ""),
        ],
    );
    let report = run(&mut SoftwarePlatform::new(), &paths, true);
    assert!(report.is_success());
    assert_eq!(report.passed(), 3);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.not_run, 0);
}

#[test]
fn unequal_gain_fault_stops_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_problems(
        dir.path(),
        &[
            ("a.csv", "10,0\n0,10\n"),
            ("b.csv", "1,2\n3,4\n"),
            ("c.csv", "7\n"),
        ],
    );
    let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
        swap_objects: Some((0, 1)),
        ..SoftwareFaults::default()
    });
    let report = run(&mut platform, &paths, true);

    assert!(!report.is_success());
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.not_run, 2);
    let failure = report.first_failure().unwrap();
    assert!(failure.path.ends_with("a.csv"));
    match &failure.outcome {
        InstanceOutcome::Checked(rep) => {
            assert_eq!(
                rep.comparison.verdict,
                Verdict::GainMismatch {
                    software: 20,
                    hardware: 0
                }
            );
            assert_eq!(rep.comparison.mismatches, vec![0, 1]);
        }
        other => panic!("expected a checked instance, got {other:?}"),
    }
}

#[test]
fn equal_gain_fault_is_an_alternate_optimum() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_problems(dir.path(), &[("tie.csv", "5,5\n5,5\n")]);
    let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
        swap_objects: Some((0, 1)),
        ..SoftwareFaults::default()
    });
    let report = run(&mut platform, &paths, true);
    assert!(report.is_success());
    assert_eq!(report.alternate_optima(), 1);
}

#[test]
fn different_unassigned_object_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_problems(
        dir.path(),
        &[
            ("spare_object.csv", "10,0,0\n0,10,10\n"),
            ("single_agent.csv", "4,4\n"),
        ],
    );
    let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
        shift_to_unassigned: true,
        ..SoftwareFaults::default()
    });
    let report = run(&mut platform, &paths, true);

    assert!(report.is_success(), "{:?}", report.first_failure());
    assert_eq!(report.passed(), 2);
    assert_eq!(report.not_run, 0);
    let spare = report
        .results
        .iter()
        .find(|r| r.path.ends_with("spare_object.csv"))
        .unwrap();
    match &spare.outcome {
        InstanceOutcome::Checked(rep) => {
            assert_eq!(rep.comparison.verdict, Verdict::AlternateOptimum { gain: 20 });
            assert_eq!(rep.comparison.mismatches, vec![1, 2]);
        }
        other => panic!("expected a checked instance, got {other:?}"),
    }
}

#[test]
fn continue_past_failures_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_problems(
        dir.path(),
        &[("a.csv", "10,0\n0,10\n"), ("b.csv", "x\n"), ("c.csv", "7\n")],
    );
    let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
        swap_objects: Some((0, 1)),
        ..SoftwareFaults::default()
    });
    let report = run(&mut platform, &paths, false);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.passed(), 1);
    assert!(matches!(report.results[1].outcome, InstanceOutcome::Errored(_)));
}

#[test]
fn wrong_bitfile_fails_every_instance() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_problems(dir.path(), &[("a.csv", "1\n")]);
    let mut platform = SoftwarePlatform::with_faults(SoftwareFaults {
        signature: Some(0),
        ..SoftwareFaults::default()
    });
    let report = run(&mut platform, &paths, true);
    assert!(matches!(
        &report.results[0].outcome,
        InstanceOutcome::Errored(auction_driver::AuctionError::UnexpectedSignature { .. })
    ));
    assert!(platform.write_log().is_empty());
}
