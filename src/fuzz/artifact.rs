//! Replayable crash artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::replay::{parse_records, reconstruct, ReplayMode, ReplayRecord};
use crate::rules::{Rules, Setup};
use crate::state::GameState;
use crate::{Role, TurnsError};

/// Everything needed to reproduce a fuzz crash.
///
/// `replay` starts with the `.setup` entry and holds every accepted action, so
/// reconstructing it reaches `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashArtifact {
    /// Setup arguments of the run.
    pub setup: Setup,
    /// Seated roles.
    pub players: Vec<Role>,
    /// State when the violation was detected; absent if setup itself failed.
    pub state: Option<GameState>,
    /// Accepted entries, oldest first.
    pub replay: Vec<ReplayRecord>,
}

impl CrashArtifact {
    /// File name for an artifact: `crash-<violation>-<fingerprint:016x>.json`.
    #[must_use]
    pub fn file_name(violation: &str, fingerprint: u64) -> String {
        format!("crash-{violation}-{fingerprint:016x}.json")
    }

    /// Writes the artifact as pretty JSON into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::Io`] or [`TurnsError::Serialization`].
    pub fn write_to(&self, dir: &Path, file_name: &str) -> Result<PathBuf, TurnsError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Reads an artifact back.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::Io`] or [`TurnsError::Serialization`].
    pub fn read_from(path: &Path) -> Result<Self, TurnsError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Replays the artifact and returns the state it reaches.
    ///
    /// Runs in debug mode: every step is kept and nothing is collapsed.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::ReplayCorrupt`] if the replay no longer runs.
    pub fn reproduce(&self, rules: &dyn Rules) -> Result<Option<GameState>, TurnsError> {
        let entries = parse_records(&self.replay)?;
        let reconstruction = reconstruct(rules, &entries, ReplayMode::Debug)?;
        match reconstruction.failure {
            Some(err) => Err(err),
            None => Ok(reconstruction.state),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::replay::tests::{setup_entry, Tally};
    use crate::replay::ReplayEntry;
    use serde_json::json;

    fn artifact() -> CrashArtifact {
        let setup: Setup = serde_json::from_value(setup_entry().arguments).unwrap();
        let entries = vec![
            setup_entry(),
            ReplayEntry::action(Role::new("A"), "add", json!(2)),
        ];
        CrashArtifact {
            players: setup.players.clone(),
            setup,
            state: None,
            replay: entries.iter().map(|e| e.to_record().unwrap()).collect(),
        }
    }

    #[test]
    fn file_name_is_stable() {
        assert_eq!(
            CrashArtifact::file_name("max-steps", 0xBEEF),
            "crash-max-steps-000000000000beef.json"
        );
    }

    #[test]
    fn written_artifact_reads_back_and_reproduces() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = artifact();
        artifact.state = artifact.reproduce(&Tally).unwrap();
        let path = artifact
            .write_to(&dir.path().join("nested"), "crash.json")
            .unwrap();
        let back = CrashArtifact::read_from(&path).unwrap();
        assert_eq!(back, artifact);
        assert_eq!(back.reproduce(&Tally).unwrap(), artifact.state);
        assert_eq!(
            artifact.state.unwrap().get("total"),
            Some(&json!(2))
        );
    }

    #[test]
    fn broken_replay_does_not_reproduce() {
        let mut artifact = artifact();
        artifact
            .replay
            .push(ReplayRecord::new("A", "boom", None));
        assert!(matches!(
            artifact.reproduce(&Tally),
            Err(TurnsError::ReplayCorrupt { step: 2, .. })
        ));
    }
}
