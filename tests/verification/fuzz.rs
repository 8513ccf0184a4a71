//! The fuzz driver against the counter title.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use fortress_turns::{
    BufferEntropy, CrashArtifact, FuzzConfig, FuzzDriver, FuzzViolation, TurnsError,
};
use web_time::Duration;

use crate::common::Counter;

fn config() -> FuzzConfig {
    FuzzConfig {
        timeout: Duration::from_secs(30),
        ..FuzzConfig::default()
    }
}

#[test]
fn well_behaved_title_survives_many_walks() {
    let mut driver = FuzzDriver::new(config()).unwrap();
    let crashes = driver.run_seeds(&Counter::new(), 1..=200).unwrap();
    assert!(crashes.is_empty(), "unexpected crashes: {crashes:?}");
    assert_eq!(driver.runs(), 200);
}

#[test]
fn step_budget_is_exact() {
    let mut driver = FuzzDriver::new(FuzzConfig {
        max_steps: 5,
        ..config()
    })
    .unwrap();
    // Some walks finish a Short game inside five steps; the rest must stop
    // at exactly five.
    for seed in 1..=50 {
        if let Some(report) = driver.run_seeded(&Counter::new(), seed).unwrap() {
            assert_eq!(report.violation, FuzzViolation::MaxSteps);
            assert_eq!(report.steps, 5);
            assert_eq!(report.artifact.replay.len(), 6);
        }
    }
}

#[test]
fn leaked_undo_is_caught_and_reproduces() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = FuzzDriver::new(config().with_crash_dir(dir.path())).unwrap();
    let leaky = Counter::leaky();
    let reports = driver.run_seeds(&leaky, 1..=50).unwrap();
    assert!(!reports.is_empty());

    for report in &reports {
        assert!(matches!(report.violation, FuzzViolation::BadUndo { .. }));
        let path = report.path.as_ref().unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("crash-bad-undo-"));

        let artifact = CrashArtifact::read_from(path).unwrap();
        assert_eq!(&artifact, &report.artifact);
        assert_eq!(artifact.reproduce(&leaky).unwrap(), artifact.state);
    }
}

#[test]
fn error_budget_aborts_the_campaign() {
    let mut driver = FuzzDriver::new(FuzzConfig {
        max_errors: 3,
        ..config()
    })
    .unwrap();
    let err = driver.run_seeds(&Counter::leaky(), 1..=1000).unwrap_err();
    assert_eq!(
        err,
        TurnsError::FuzzAborted {
            errors: 3,
            max_errors: 3
        }
    );
    assert_eq!(driver.errors(), 3);
}

#[test]
fn corpus_buffers_drive_reproducible_walks() {
    let corpus: Vec<u8> = (0u8..=255).cycle().take(512).collect();
    let mut first = FuzzDriver::new(config()).unwrap();
    let mut second = FuzzDriver::new(config()).unwrap();
    let a = first
        .run(&Counter::leaky(), &mut BufferEntropy::new(corpus.clone()))
        .unwrap();
    let b = second
        .run(&Counter::leaky(), &mut BufferEntropy::new(corpus))
        .unwrap();
    assert_eq!(a, b);
}
