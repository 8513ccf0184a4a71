//! Replay reconstruction.
//!
//! A replay is the persisted list of everything that happened to a game:
//! a `.setup` entry followed by actions and resignations. [`reconstruct`]
//! walks it through the rules module from an undefined initial state and
//! annotates every entry:
//!
//! - **digest**: [`snapshot::digest`](crate::snapshot::digest) of the state
//!   after the entry (normal mode only).
//! - **remove**: set on every entry of a span that returned the game to a
//!   state it was already in. After step `p`, the entries before `p` are
//!   scanned backwards for the nearest one that has the same digest and is
//!   not already removed; if one is found at `k`, entries `k+1..=p` are
//!   removed. A play / undo / play-again cycle collapses to its net effect.
//! - **is_checkpoint**: entry 0 always; for `p >= 1`, entry `p + 1` when the
//!   `active` field differs between the states before and after step `p`.
//!   Checkpoints are the turn boundaries the replay viewer jumps between.
//!
//! Removed entries are filtered out of the result.

mod navigator;

pub use navigator::ReplayNavigator;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::{Rules, Setup};
use crate::snapshot;
use crate::state::GameState;
use crate::{Role, TurnsError};

/// Action name of the entry that sets the game up.
pub const SETUP_ACTION: &str = ".setup";

/// Action name of a resignation entry.
pub const RESIGN_ACTION: &str = ".resign";

/// One replay entry as persisted: arguments are JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Acting role; the observer role for `.setup`.
    pub role: Role,
    /// Verb, or [`SETUP_ACTION`] / [`RESIGN_ACTION`].
    pub action: String,
    /// JSON-encoded arguments, absent for argument-less verbs.
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ReplayRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(role: impl Into<Role>, action: impl Into<String>, arguments: Option<String>) -> Self {
        Self {
            role: role.into(),
            action: action.into(),
            arguments,
        }
    }

    /// Parses the arguments.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::Serialization`] if the arguments are not JSON.
    pub fn parse(&self) -> Result<ReplayEntry, TurnsError> {
        let arguments = match &self.arguments {
            Some(text) => serde_json::from_str(text)?,
            None => Value::Null,
        };
        Ok(ReplayEntry {
            role: self.role.clone(),
            action: self.action.clone(),
            arguments,
        })
    }
}

/// Parses persisted records.
///
/// # Errors
///
/// Returns [`TurnsError::ReplayCorrupt`] naming the first record whose
/// arguments do not parse.
pub fn parse_records(records: &[ReplayRecord]) -> Result<Vec<ReplayEntry>, TurnsError> {
    records
        .iter()
        .enumerate()
        .map(|(step, record)| {
            record.parse().map_err(|cause| TurnsError::ReplayCorrupt {
                step,
                cause: Box::new(cause),
            })
        })
        .collect()
}

/// One replay entry with parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEntry {
    /// Acting role.
    pub role: Role,
    /// Verb, or [`SETUP_ACTION`] / [`RESIGN_ACTION`].
    pub action: String,
    /// Arguments; `null` when there are none.
    pub arguments: Value,
}

impl ReplayEntry {
    /// The `.setup` entry for `setup`.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::Serialization`] if `setup` cannot be encoded.
    pub fn setup(setup: &Setup) -> Result<Self, TurnsError> {
        Ok(Self {
            role: Role::observer(),
            action: SETUP_ACTION.to_owned(),
            arguments: serde_json::to_value(setup)?,
        })
    }

    /// A `.resign` entry.
    #[must_use]
    pub fn resign(role: Role) -> Self {
        Self {
            role,
            action: RESIGN_ACTION.to_owned(),
            arguments: Value::Null,
        }
    }

    /// An action entry.
    #[must_use]
    pub fn action(role: Role, verb: impl Into<String>, arguments: Value) -> Self {
        Self {
            role,
            action: verb.into(),
            arguments,
        }
    }

    /// Returns `true` for a `.setup` entry.
    #[must_use]
    pub fn is_setup(&self) -> bool {
        self.action == SETUP_ACTION
    }

    /// Encodes the entry for persistence.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::Serialization`] if the arguments cannot be encoded.
    pub fn to_record(&self) -> Result<ReplayRecord, TurnsError> {
        let arguments = match &self.arguments {
            Value::Null => None,
            other => Some(serde_json::to_string(other)?),
        };
        Ok(ReplayRecord {
            role: self.role.clone(),
            action: self.action.clone(),
            arguments,
        })
    }
}

/// A replay entry with reconstruction annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedEntry {
    /// The entry.
    #[serde(flatten)]
    pub entry: ReplayEntry,
    /// Whether a turn boundary precedes this entry.
    pub is_checkpoint: bool,
    /// Digest of the state after this entry; absent in debug mode.
    pub digest: Option<u32>,
    /// Whether this entry belongs to a collapsed span.
    pub remove: bool,
}

/// Selects reconstruction behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplayMode {
    /// Digest every step and collapse undone spans; a failing step makes the
    /// whole replay unusable.
    #[default]
    Normal,
    /// Keep every step for inspection; a failing step truncates the replay
    /// and the cause is reported alongside the partial history.
    Debug,
}

/// The outcome of [`reconstruct`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// State after the last surviving step; `None` for an empty replay.
    pub state: Option<GameState>,
    /// Surviving annotated entries.
    pub entries: Vec<AnnotatedEntry>,
    /// Why the replay stopped early (debug mode, or snapshot fallback).
    pub failure: Option<TurnsError>,
}

impl Reconstruction {
    /// Indices of checkpoint entries.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_checkpoint)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns `true` if every entry was replayed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Applies one entry to `state` through the rules module.
///
/// `state` is cloned before `action` / `resign`, so it is never disturbed by a
/// failing call.
///
/// # Errors
///
/// Returns the rules module's error, [`TurnsError::Serialization`] for a
/// malformed `.setup` payload, or [`TurnsError::InvalidRequest`] for an action
/// that precedes `.setup`.
pub fn apply_entry(
    rules: &dyn Rules,
    state: Option<&GameState>,
    entry: &ReplayEntry,
) -> Result<GameState, TurnsError> {
    if entry.is_setup() {
        let setup: Setup = serde_json::from_value(entry.arguments.clone())?;
        return Ok(rules.setup(&setup)?);
    }
    let Some(state) = state else {
        return Err(TurnsError::InvalidRequest {
            info: format!("{} before {}", entry.action, SETUP_ACTION),
        });
    };
    if entry.action == RESIGN_ACTION {
        Ok(rules.resign(state.clone(), &entry.role)?)
    } else {
        Ok(rules.action(state.clone(), &entry.role, &entry.action, &entry.arguments)?)
    }
}

/// Replays `entries` through `rules`.
///
/// # Errors
///
/// In [`ReplayMode::Normal`], returns [`TurnsError::ReplayCorrupt`] if any
/// step fails or cannot be digested. [`ReplayMode::Debug`] never fails; the
/// cause is in [`Reconstruction::failure`].
pub fn reconstruct(
    rules: &dyn Rules,
    entries: &[ReplayEntry],
    mode: ReplayMode,
) -> Result<Reconstruction, TurnsError> {
    let mut state: Option<GameState> = None;
    let mut annotated: Vec<AnnotatedEntry> = Vec::with_capacity(entries.len());
    let mut next_is_checkpoint = true;
    let mut failure = None;

    for (p, entry) in entries.iter().enumerate() {
        let next = apply_entry(rules, state.as_ref(), entry).and_then(|next| {
            let digest = match mode {
                ReplayMode::Normal => Some(snapshot::digest(&next)?),
                ReplayMode::Debug => None,
            };
            Ok((next, digest))
        });
        let (next, digest) = match next {
            Ok(ok) => ok,
            Err(cause) => {
                let err = TurnsError::ReplayCorrupt {
                    step: p,
                    cause: Box::new(cause),
                };
                match mode {
                    ReplayMode::Normal => {
                        tracing::warn!(step = p, action = %entry.action, "replay unusable: {}", err);
                        return Err(err);
                    },
                    ReplayMode::Debug => {
                        tracing::debug!(step = p, action = %entry.action, "replay truncated: {}", err);
                        failure = Some(err);
                        break;
                    },
                }
            },
        };

        annotated.push(AnnotatedEntry {
            entry: entry.clone(),
            is_checkpoint: next_is_checkpoint,
            digest,
            remove: false,
        });

        next_is_checkpoint = match &state {
            Some(before) if p >= 1 => before.active_value() != next.active_value(),
            _ => false,
        };

        if let Some(digest) = digest {
            collapse_undone(&mut annotated, p, digest);
        }

        state = Some(next);
    }

    annotated.retain(|e| !e.remove);
    Ok(Reconstruction {
        state,
        entries: annotated,
        failure,
    })
}

/// Marks `k+1..=p` as removed when the nearest earlier surviving entry `k`
/// has digest `digest`.
///
/// Returns the matched index.
pub fn collapse_undone(entries: &mut [AnnotatedEntry], p: usize, digest: u32) -> Option<usize> {
    let k = (0..p)
        .rev()
        .find(|&k| !entries[k].remove && entries[k].digest == Some(digest))?;
    for entry in &mut entries[k + 1..=p] {
        entry.remove = true;
    }
    Some(k)
}

/// [`reconstruct`] in normal mode, falling back to a flat snapshot.
///
/// If the replay is unusable and `snapshot` is given, the result carries the
/// snapshot as its state, no entries, and the cause in `failure`.
///
/// # Errors
///
/// Returns the reconstruction error when there is no snapshot to fall back to.
pub fn reconstruct_or_snapshot(
    rules: &dyn Rules,
    entries: &[ReplayEntry],
    snapshot: Option<GameState>,
) -> Result<Reconstruction, TurnsError> {
    match (reconstruct(rules, entries, ReplayMode::Normal), snapshot) {
        (Ok(reconstruction), _) => Ok(reconstruction),
        (Err(err), Some(state)) => {
            tracing::info!("falling back to snapshot: {}", err);
            Ok(Reconstruction {
                state: Some(state),
                entries: Vec::new(),
                failure: Some(err),
            })
        },
        (Err(err), None) => Err(err),
    }
}

/// Turns surviving annotated entries back into persistable records.
///
/// Entries still marked `remove` are skipped.
///
/// # Errors
///
/// Returns [`TurnsError::Serialization`] if an entry's arguments cannot be encoded.
pub fn clean_replay(entries: &[AnnotatedEntry]) -> Result<Vec<ReplayRecord>, TurnsError> {
    entries
        .iter()
        .filter(|e| !e.remove)
        .map(|e| e.entry.to_record())
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
pub(crate) mod tests {
    use super::*;
    use crate::view::{ActionArgs, View};
    use crate::{RulesError, RulesOperation, Scenarios};
    use serde_json::{json, Map};

    /// Two players alternately add to a counter; `add` keeps the turn,
    /// `pass` hands it over, `undo` pops the undo stack, `boom` fails.
    pub(crate) struct Tally;

    impl Rules for Tally {
        fn title(&self) -> &str {
            "tally"
        }
        fn scenarios(&self) -> Scenarios {
            Scenarios::List(vec!["Standard".into()])
        }
        fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
            vec![Role::new("A"), Role::new("B")]
        }
        fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
            Ok(GameState::try_from(json!({
                "seed": setup.seed,
                "active": "A",
                "total": 0,
                "log": [],
                "undo": []
            }))
            .unwrap())
        }
        fn action(
            &self,
            mut state: GameState,
            role: &Role,
            verb: &str,
            args: &Value,
        ) -> Result<GameState, RulesError> {
            match verb {
                "add" => {
                    let mut snapshot = state.clone();
                    snapshot.as_map_mut().remove("undo");
                    let total = state.get("total").and_then(Value::as_i64).unwrap_or(0);
                    let n = args.as_i64().unwrap_or(1);
                    state.set("total", json!(total + n));
                    state.push_log(format!("{role} adds {n}."));
                    if let Some(Value::Array(stack)) = state.as_map_mut().get_mut("undo") {
                        stack.push(snapshot.into_value());
                    }
                    Ok(state)
                },
                "undo" => {
                    let mut stack = match state.get("undo") {
                        Some(Value::Array(stack)) => stack.clone(),
                        _ => Vec::new(),
                    };
                    let previous = stack
                        .pop()
                        .ok_or_else(|| RulesError::new(RulesOperation::Action, "nothing to undo"))?;
                    let mut restored = GameState::try_from(previous).unwrap();
                    restored.set("undo", Value::Array(stack));
                    Ok(restored)
                },
                "pass" => {
                    let next = if role == "A" { "B" } else { "A" };
                    state.set("active", json!(next));
                    state.set("undo", json!([]));
                    state.push_log(format!("{role} passes."));
                    Ok(state)
                },
                "boom" => Err(RulesError::new(RulesOperation::Action, "boom")),
                other => Err(RulesError::new(
                    RulesOperation::Action,
                    format!("unknown verb {other}"),
                )),
            }
        }
        fn resign(&self, mut state: GameState, _: &Role) -> Result<GameState, RulesError> {
            state.set("active", json!("None"));
            state.set("state", json!("game_over"));
            Ok(state)
        }
        fn view(&self, state: &GameState, role: &Role) -> Result<View, RulesError> {
            let mut view = View::default();
            if state.active().includes(role) {
                view = view
                    .with_action("add", ActionArgs::Choices(vec![json!(1), json!(2)]))
                    .with_action("pass", ActionArgs::Flag(true));
            }
            Ok(view)
        }
    }

    pub(crate) fn setup_entry() -> ReplayEntry {
        ReplayEntry::setup(&Setup::new(1, "Standard", vec![Role::new("A"), Role::new("B")]))
            .unwrap()
    }

    fn act(role: &str, verb: &str, args: Value) -> ReplayEntry {
        ReplayEntry::action(Role::new(role), verb, args)
    }

    fn actions(e: &Reconstruction) -> Vec<&str> {
        e.entries.iter().map(|a| a.entry.action.as_str()).collect()
    }

    #[test]
    fn undone_span_collapses_to_net_effect() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(1)),
            act("A", "add", json!(2)),
            act("A", "undo", Value::Null),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        assert_eq!(actions(&result), vec![".setup", "add"]);
        assert_eq!(result.state.unwrap().get("total"), Some(&json!(1)));
    }

    #[test]
    fn collapse_is_idempotent() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(1)),
            act("A", "add", json!(2)),
            act("A", "undo", Value::Null),
            act("A", "pass", Value::Null),
        ];
        let first = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        let survivors: Vec<ReplayEntry> = first.entries.iter().map(|a| a.entry.clone()).collect();
        let second = reconstruct(&Tally, &survivors, ReplayMode::Normal).unwrap();
        assert_eq!(second.entries.len(), survivors.len());
        assert_eq!(second.state, first.state);
    }

    #[test]
    fn checkpoints_mark_turn_boundaries() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(1)),
            act("A", "pass", Value::Null),
            act("B", "add", json!(2)),
            act("B", "pass", Value::Null),
            act("A", "add", json!(1)),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        // Entry 0 always; entries after each pass.
        assert_eq!(result.checkpoints(), vec![0, 3, 5]);
    }

    #[test]
    fn no_active_change_means_single_checkpoint() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(1)),
            act("A", "add", json!(1)),
            act("A", "add", json!(1)),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        assert_eq!(result.checkpoints(), vec![0]);
    }

    #[test]
    fn normal_mode_failure_is_corrupt() {
        let entries = vec![setup_entry(), act("A", "add", json!(1)), act("A", "boom", Value::Null)];
        let err = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap_err();
        assert!(matches!(err, TurnsError::ReplayCorrupt { step: 2, .. }));
    }

    #[test]
    fn debug_mode_failure_truncates() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(1)),
            act("A", "boom", Value::Null),
            act("A", "add", json!(1)),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Debug).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert!(result.entries.iter().all(|e| e.digest.is_none()));
        assert!(matches!(result.failure, Some(TurnsError::ReplayCorrupt { step: 2, .. })));
        assert_eq!(result.state.unwrap().get("total"), Some(&json!(1)));
    }

    #[test]
    fn debug_mode_does_not_collapse() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(1)),
            act("A", "undo", Value::Null),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Debug).unwrap();
        assert_eq!(result.entries.len(), 3);
    }

    #[test]
    fn action_before_setup_is_corrupt() {
        let entries = vec![act("A", "add", json!(1))];
        let err = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap_err();
        match err {
            TurnsError::ReplayCorrupt { step, cause } => {
                assert_eq!(step, 0);
                assert!(matches!(*cause, TurnsError::InvalidRequest { .. }));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn snapshot_fallback() {
        let entries = vec![setup_entry(), act("A", "boom", Value::Null)];
        let snapshot = GameState::try_from(json!({ "active": "B", "total": 9 })).unwrap();
        let result = reconstruct_or_snapshot(&Tally, &entries, Some(snapshot.clone())).unwrap();
        assert_eq!(result.state, Some(snapshot));
        assert!(result.entries.is_empty());
        assert!(!result.is_complete());
        assert!(reconstruct_or_snapshot(&Tally, &entries, None).is_err());
    }

    #[test]
    fn resign_entry_replays() {
        let entries = vec![setup_entry(), ReplayEntry::resign(Role::new("A"))];
        let result = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        assert!(result.state.unwrap().is_game_over());
    }

    #[test]
    fn clean_replay_round_trips_through_records() {
        let entries = vec![
            setup_entry(),
            act("A", "add", json!(2)),
            act("A", "pass", Value::Null),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        let records = clean_replay(&result.entries).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].arguments.as_deref(), Some("2"));
        assert_eq!(records[2].arguments, None);
        let parsed = parse_records(&records).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn malformed_record_arguments_name_the_step() {
        let records = vec![
            ReplayRecord::new("A", "add", Some("1".into())),
            ReplayRecord::new("A", "add", Some("{not json".into())),
        ];
        assert!(matches!(
            parse_records(&records),
            Err(TurnsError::ReplayCorrupt { step: 1, .. })
        ));
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::tests::{setup_entry, Tally};
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_entry() -> impl Strategy<Value = ReplayEntry> {
        prop_oneof![
            (1i64..3).prop_map(|n| ReplayEntry::action(Role::new("?"), "add", json!(n))),
            Just(ReplayEntry::action(Role::new("?"), "undo", Value::Null)),
            Just(ReplayEntry::action(Role::new("?"), "pass", Value::Null)),
        ]
    }

    /// Rewrites roles so each entry is made by whoever is active, and drops
    /// undo entries that would fail.
    fn legalize(raw: Vec<ReplayEntry>) -> Vec<ReplayEntry> {
        let mut entries = vec![setup_entry()];
        let mut state = apply_entry(&Tally, None, &entries[0]).unwrap();
        for mut entry in raw {
            entry.role = Role::new(state.get("active").and_then(Value::as_str).unwrap());
            if let Ok(next) = apply_entry(&Tally, Some(&state), &entry) {
                state = next;
                entries.push(entry);
            }
        }
        entries
    }

    proptest! {
        /// Property: a collapsed replay has nothing left to collapse.
        #[test]
        fn prop_collapse_idempotent(raw in proptest::collection::vec(arb_entry(), 0..40)) {
            let entries = legalize(raw);
            let first = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
            let survivors: Vec<ReplayEntry> = first.entries.iter().map(|a| a.entry.clone()).collect();
            let second = reconstruct(&Tally, &survivors, ReplayMode::Normal).unwrap();
            prop_assert_eq!(second.entries.len(), survivors.len());
        }

        /// Property: reconstruction is deterministic, digest for digest.
        #[test]
        fn prop_reconstruct_deterministic(raw in proptest::collection::vec(arb_entry(), 0..40)) {
            let entries = legalize(raw);
            let a = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
            let b = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
            prop_assert_eq!(a.entries, b.entries);
        }

        /// Property: collapsing never changes the final state's digest.
        #[test]
        fn prop_collapse_preserves_final_state(raw in proptest::collection::vec(arb_entry(), 0..40)) {
            let entries = legalize(raw);
            let full = reconstruct(&Tally, &entries, ReplayMode::Debug).unwrap();
            let collapsed = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
            let full_digest = snapshot::digest(full.state.as_ref().unwrap()).unwrap();
            let collapsed_digest = snapshot::digest(collapsed.state.as_ref().unwrap()).unwrap();
            prop_assert_eq!(full_digest, collapsed_digest);
        }
    }
}
