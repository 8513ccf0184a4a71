//! The random-walk driver.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use web_time::Instant;

use crate::fuzz::artifact::CrashArtifact;
use crate::fuzz::config::FuzzConfig;
use crate::fuzz::entropy::{EntropySource, SeededEntropy};
use crate::replay::{ReplayEntry, ReplayRecord};
use crate::rng::STANDARD_MODULUS;
use crate::rules::{Rules, Setup};
use crate::state::GameState;
use crate::telemetry::{self, Violation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::TurnsError;

/// Why a fuzz run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuzzViolation {
    /// The acting role's view offered nothing the driver may play.
    NoMoreActions,
    /// The state changed hands or reseeded while its undo stack was non-empty.
    BadUndo {
        /// What changed.
        reason: String,
    },
    /// The step budget ran out before the game ended.
    MaxSteps,
    /// The wall-clock budget ran out before the game ended.
    Timeout,
    /// The rules module threw during setup, view or action.
    RulesFailed {
        /// The rules module's message.
        message: String,
    },
    /// The rules module's own invariant check failed.
    AssertionFailed {
        /// The rules module's message.
        message: String,
    },
}

impl FuzzViolation {
    /// Short kebab-case name, used in artifact file names.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoMoreActions => "no-more-actions",
            Self::BadUndo { .. } => "bad-undo",
            Self::MaxSteps => "max-steps",
            Self::Timeout => "timeout",
            Self::RulesFailed { .. } => "rules-failed",
            Self::AssertionFailed { .. } => "assertion-failed",
        }
    }
}

impl fmt::Display for FuzzViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMoreActions => write!(f, "NoMoreActions"),
            Self::BadUndo { reason } => write!(f, "BadUndo: {}", reason),
            Self::MaxSteps => write!(f, "MaxSteps"),
            Self::Timeout => write!(f, "Timeout"),
            Self::RulesFailed { message } => write!(f, "RulesFailed: {}", message),
            Self::AssertionFailed { message } => write!(f, "AssertionFailed: {}", message),
        }
    }
}

/// One crashed run.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    /// What went wrong.
    pub violation: FuzzViolation,
    /// The replayable artifact.
    pub artifact: CrashArtifact,
    /// Fingerprint of the entropy source.
    pub fingerprint: u64,
    /// Accepted actions before the violation.
    pub steps: usize,
    /// The action that was being played when the rules module threw.
    pub last_action: Option<ReplayEntry>,
    /// Where the artifact was written, if a crash directory is configured.
    pub path: Option<PathBuf>,
}

enum Outcome {
    Finished { steps: usize },
    Crashed(Box<Crash>),
}

struct Crash {
    violation: FuzzViolation,
    artifact: CrashArtifact,
    steps: usize,
    last_action: Option<ReplayEntry>,
}

/// What one walk has accumulated; turned into an artifact on a crash.
struct Walk {
    setup: Setup,
    replay: Vec<ReplayRecord>,
    steps: usize,
}

impl Walk {
    fn crash(
        self,
        violation: FuzzViolation,
        state: Option<GameState>,
        last_action: Option<ReplayEntry>,
    ) -> Outcome {
        Outcome::Crashed(Box::new(Crash {
            violation,
            artifact: CrashArtifact {
                players: self.setup.players.clone(),
                setup: self.setup,
                state,
                replay: self.replay,
            },
            steps: self.steps,
            last_action,
        }))
    }
}

/// Drives a rules module through random walks.
///
/// Every run draws a seed and a scenario from the entropy source, sets the
/// game up with empty options, then repeatedly picks an eligible role, one of
/// its enabled verbs (never the excluded ones) and one of that verb's
/// arguments. After each accepted action it checks:
///
/// - with a non-empty undo stack, neither `active` nor `seed` changed;
/// - the rules module's own `assert_state` passes.
///
/// A run ends cleanly when nobody is active, the game is over, or the entropy
/// runs dry. Anything else yields a [`CrashReport`]. Once `max_errors`
/// crashes have been recorded, further runs are refused.
///
/// # Example
///
/// ```ignore
/// let mut driver = FuzzDriver::new(FuzzConfig::quick())?;
/// for seed in 1..=100 {
///     if let Some(report) = driver.run_seeded(&rules, seed)? {
///         eprintln!("{}: {}", seed, report.violation);
///     }
/// }
/// ```
pub struct FuzzDriver {
    config: FuzzConfig,
    runs: usize,
    errors: usize,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl FuzzDriver {
    /// Creates a driver.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: FuzzConfig) -> Result<Self, TurnsError> {
        config.validate()?;
        Ok(Self {
            config,
            runs: 0,
            errors: 0,
            violation_observer: None,
        })
    }

    /// Routes crash reports to `observer` as [`ViolationKind::Fuzz`] violations.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// The driver's configuration.
    #[must_use]
    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    /// Runs started so far.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Crashes recorded so far.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// One walk with entropy from `seed`.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn run_seeded(
        &mut self,
        rules: &dyn Rules,
        seed: u64,
    ) -> Result<Option<CrashReport>, TurnsError> {
        self.run(rules, &mut SeededEntropy::new(seed))
    }

    /// One walk per seed, collecting crashes.
    ///
    /// # Errors
    ///
    /// Stops at the first error, including [`TurnsError::FuzzAborted`].
    pub fn run_seeds(
        &mut self,
        rules: &dyn Rules,
        seeds: impl IntoIterator<Item = u64>,
    ) -> Result<Vec<CrashReport>, TurnsError> {
        let mut reports = Vec::new();
        for seed in seeds {
            if let Some(report) = self.run_seeded(rules, seed)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// One walk.
    ///
    /// Returns `None` for a clean run.
    ///
    /// # Errors
    ///
    /// [`TurnsError::FuzzAborted`] once `max_errors` crashes have been
    /// recorded, and I/O or serialization failures while persisting an artifact.
    pub fn run<E: EntropySource>(
        &mut self,
        rules: &dyn Rules,
        entropy: &mut E,
    ) -> Result<Option<CrashReport>, TurnsError> {
        if self.errors >= self.config.max_errors {
            return Err(TurnsError::FuzzAborted {
                errors: self.errors,
                max_errors: self.config.max_errors,
            });
        }
        self.runs += 1;
        match self.walk(rules, entropy)? {
            Outcome::Finished { steps } => {
                tracing::trace!(title = rules.title(), steps, "fuzz run finished");
                Ok(None)
            },
            Outcome::Crashed(crash) => self.record(*crash, entropy.fingerprint()).map(Some),
        }
    }

    fn walk<E: EntropySource>(
        &self,
        rules: &dyn Rules,
        entropy: &mut E,
    ) -> Result<Outcome, TurnsError> {
        let started = Instant::now();

        let seed = entropy.consume_integral_in_range(1, STANDARD_MODULUS - 1);
        let scenarios = rules.scenarios();
        let names = scenarios.names();
        let scenario = entropy.pick_value(&names).copied().unwrap_or_default();
        let players = rules.roles(scenario, &Map::new());
        let setup = Setup::new(seed, scenario, players.clone());

        let mut walk = Walk {
            replay: vec![ReplayEntry::setup(&setup)?.to_record()?],
            setup,
            steps: 0,
        };
        let mut state = match rules.setup(&walk.setup) {
            Ok(state) => state,
            Err(err) => {
                return Ok(walk.crash(
                    FuzzViolation::RulesFailed {
                        message: err.message,
                    },
                    None,
                    None,
                ))
            },
        };

        loop {
            if state.active().is_terminal() || state.is_game_over() || entropy.is_exhausted() {
                return Ok(Outcome::Finished { steps: walk.steps });
            }
            if walk.steps >= self.config.max_steps {
                return Ok(walk.crash(FuzzViolation::MaxSteps, Some(state), None));
            }
            if started.elapsed() > self.config.timeout {
                return Ok(walk.crash(FuzzViolation::Timeout, Some(state), None));
            }

            let candidates = state.active().candidates(&players);
            let Some(actor) = entropy.pick_value(candidates.as_slice()).cloned() else {
                return Ok(walk.crash(FuzzViolation::NoMoreActions, Some(state), None));
            };
            let view = match rules.view(&state, &actor) {
                Ok(view) => view,
                Err(err) => {
                    return Ok(walk.crash(
                        FuzzViolation::RulesFailed {
                            message: err.message,
                        },
                        Some(state),
                        None,
                    ))
                },
            };
            let playable: Vec<(&str, Vec<Value>)> = view
                .enabled_actions()
                .filter(|(verb, _)| !self.config.is_excluded(verb))
                .map(|(verb, args)| (verb, args.choices()))
                .filter(|(_, choices)| !choices.is_empty())
                .collect();
            let Some((verb, choices)) = entropy.pick_value(&playable) else {
                return Ok(walk.crash(FuzzViolation::NoMoreActions, Some(state), None));
            };
            let argument = entropy.pick_value(choices).cloned().unwrap_or(Value::Null);
            let entry = ReplayEntry::action(actor.clone(), *verb, argument);

            let next = match rules.action(state.clone(), &actor, &entry.action, &entry.arguments) {
                Ok(next) => next,
                Err(err) => {
                    return Ok(walk.crash(
                        FuzzViolation::RulesFailed {
                            message: err.message,
                        },
                        Some(state),
                        Some(entry),
                    ))
                },
            };
            walk.replay.push(entry.to_record()?);
            walk.steps += 1;

            if let Some(reason) = undo_breach(&state, &next) {
                return Ok(walk.crash(FuzzViolation::BadUndo { reason }, Some(next), None));
            }
            if let Err(err) = rules.assert_state(&next) {
                return Ok(walk.crash(
                    FuzzViolation::AssertionFailed {
                        message: err.message,
                    },
                    Some(next),
                    None,
                ));
            }
            state = next;
        }
    }

    fn record(&mut self, crash: Crash, fingerprint: u64) -> Result<CrashReport, TurnsError> {
        self.errors += 1;
        let file_name = CrashArtifact::file_name(crash.violation.name(), fingerprint);
        let path = match &self.config.crash_dir {
            Some(dir) => Some(crash.artifact.write_to(dir, &file_name)?),
            None => None,
        };

        tracing::error!(
            violation = %crash.violation,
            steps = crash.steps,
            artifact = %file_name,
            "fuzz crash"
        );
        let violation = Violation::new(
            ViolationSeverity::Error,
            ViolationKind::Fuzz,
            format!("{} ({file_name})", crash.violation),
            concat!(file!(), ":", line!()),
        )
        .with_step(crash.steps);
        telemetry::report_to_observer(self.violation_observer.as_ref(), &violation);
        if self.errors >= self.config.max_errors {
            tracing::error!(
                errors = self.errors,
                "fuzz error budget exhausted; further runs are refused"
            );
        }

        Ok(CrashReport {
            violation: crash.violation,
            artifact: crash.artifact,
            fingerprint,
            steps: crash.steps,
            last_action: crash.last_action,
            path,
        })
    }
}

/// With a non-empty undo stack the turn is still in progress: the actor and
/// the random stream must stay put.
fn undo_breach(before: &GameState, after: &GameState) -> Option<String> {
    let depth = after.undo_depth();
    if depth == 0 {
        return None;
    }
    if before.active_value() != after.active_value() {
        return Some(format!(
            "active changed from {} to {} with {} undo entries",
            before.active(),
            after.active(),
            depth
        ));
    }
    if before.seed() != after.seed() {
        return Some(format!("seed changed with {} undo entries", depth));
    }
    None
}

impl fmt::Debug for FuzzDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            config,
            runs,
            errors,
            violation_observer,
        } = self;

        f.debug_struct("FuzzDriver")
            .field("config", config)
            .field("runs", runs)
            .field("errors", errors)
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
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
    use crate::fuzz::entropy::BufferEntropy;
    use crate::replay::tests::Tally;
    use crate::rules::Scenarios;
    use crate::telemetry::CollectingObserver;
    use crate::view::{ActionArgs, View};
    use crate::{Role, RulesError, RulesOperation};
    use serde_json::json;
    use web_time::Duration;

    /// One seat, one `tick` button, knobs for every failure mode.
    #[derive(Default)]
    struct Walker {
        end_after: Option<i64>,
        stuck: bool,
        bad_undo: bool,
        reseed: bool,
        assert_below: Option<i64>,
        slow: bool,
    }

    impl Rules for Walker {
        fn title(&self) -> &str {
            "walker"
        }
        fn scenarios(&self) -> Scenarios {
            Scenarios::List(vec!["Standard".into()])
        }
        fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
            vec![Role::new("Solo")]
        }
        fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
            Ok(GameState::try_from(json!({
                "seed": setup.seed,
                "active": "Solo",
                "count": 0,
                "log": [],
                "undo": []
            }))
            .unwrap())
        }
        fn action(
            &self,
            mut state: GameState,
            _: &Role,
            verb: &str,
            _: &Value,
        ) -> Result<GameState, RulesError> {
            if verb != "tick" {
                return Err(RulesError::new(RulesOperation::Action, format!("played {verb}")));
            }
            if self.slow {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            let count = state.get("count").and_then(Value::as_i64).unwrap() + 1;
            state.set("count", json!(count));
            state.push_log(format!("tick {count}"));
            if self.end_after == Some(count) {
                state.set("active", json!("None"));
            }
            if self.bad_undo {
                state.set("active", json!("Other"));
                state.set("undo", json!([{}]));
            }
            if self.reseed {
                state.random(10);
                state.set("undo", json!([{}]));
            }
            Ok(state)
        }
        fn resign(&self, state: GameState, _: &Role) -> Result<GameState, RulesError> {
            Ok(state)
        }
        fn view(&self, _: &GameState, _: &Role) -> Result<View, RulesError> {
            if self.stuck {
                return Ok(View::with_prompt("Wait."));
            }
            Ok(View::with_prompt("Tick.")
                .with_action("tick", ActionArgs::Flag(true))
                .with_action("undo", ActionArgs::Flag(true))
                .with_action("shown", ActionArgs::Flag(false)))
        }
        fn assert_state(&self, state: &GameState) -> Result<(), RulesError> {
            let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
            match self.assert_below {
                Some(limit) if count >= limit => Err(RulesError::new(
                    RulesOperation::Assert,
                    format!("count reached {count}"),
                )),
                _ => Ok(()),
            }
        }
    }

    fn driver(max_steps: usize) -> FuzzDriver {
        FuzzDriver::new(FuzzConfig {
            max_steps,
            timeout: Duration::from_secs(60),
            ..FuzzConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn max_steps_after_exactly_that_many_actions() {
        let mut driver = driver(5);
        let report = driver.run_seeded(&Walker::default(), 1).unwrap().unwrap();
        assert_eq!(report.violation, FuzzViolation::MaxSteps);
        assert_eq!(report.steps, 5);
        assert_eq!(report.artifact.replay.len(), 6);
        let state = report.artifact.state.as_ref().unwrap();
        assert_eq!(state.get("count"), Some(&json!(5)));
        assert_eq!(driver.errors(), 1);
    }

    #[test]
    fn excluded_verbs_are_never_played() {
        let mut driver = driver(50);
        let report = driver.run_seeded(&Walker::default(), 3).unwrap().unwrap();
        assert!(report
            .artifact
            .replay
            .iter()
            .skip(1)
            .all(|record| record.action == "tick"));
    }

    #[test]
    fn terminal_active_ends_cleanly() {
        let mut driver = driver(50);
        let rules = Walker {
            end_after: Some(3),
            ..Walker::default()
        };
        assert!(driver.run_seeded(&rules, 7).unwrap().is_none());
        assert_eq!(driver.errors(), 0);
        assert_eq!(driver.runs(), 1);
    }

    #[test]
    fn empty_view_is_no_more_actions() {
        let mut driver = driver(50);
        let rules = Walker {
            stuck: true,
            ..Walker::default()
        };
        let report = driver.run_seeded(&rules, 7).unwrap().unwrap();
        assert_eq!(report.violation, FuzzViolation::NoMoreActions);
        assert_eq!(report.steps, 0);
    }

    #[test]
    fn turn_change_with_pending_undo_is_bad_undo() {
        let mut driver = driver(50);
        let rules = Walker {
            bad_undo: true,
            ..Walker::default()
        };
        let report = driver.run_seeded(&rules, 7).unwrap().unwrap();
        match &report.violation {
            FuzzViolation::BadUndo { reason } => assert!(reason.contains("active changed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reseed_with_pending_undo_is_bad_undo() {
        let mut driver = driver(50);
        let rules = Walker {
            reseed: true,
            ..Walker::default()
        };
        let report = driver.run_seeded(&rules, 7).unwrap().unwrap();
        match &report.violation {
            FuzzViolation::BadUndo { reason } => assert!(reason.contains("seed changed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn failed_assertion_is_reported() {
        let mut driver = driver(50);
        let rules = Walker {
            assert_below: Some(3),
            ..Walker::default()
        };
        let report = driver.run_seeded(&rules, 7).unwrap().unwrap();
        assert!(matches!(report.violation, FuzzViolation::AssertionFailed { .. }));
        assert_eq!(report.steps, 3);
    }

    #[test]
    fn slow_rules_time_out() {
        let mut driver = FuzzDriver::new(FuzzConfig {
            timeout: Duration::from_millis(1),
            ..FuzzConfig::default()
        })
        .unwrap();
        let rules = Walker {
            slow: true,
            ..Walker::default()
        };
        let report = driver.run_seeded(&rules, 7).unwrap().unwrap();
        assert_eq!(report.violation, FuzzViolation::Timeout);
    }

    #[test]
    fn exhausted_buffer_ends_cleanly() {
        let mut driver = driver(50);
        // Four bytes for the seed (a 35-bit range consumes five, so all four go)
        // leave nothing for the walk.
        let mut entropy = BufferEntropy::new(vec![1, 2, 3, 4]);
        assert!(driver.run(&Walker::default(), &mut entropy).unwrap().is_none());
    }

    #[test]
    fn error_budget_refuses_further_runs() {
        let observer = Arc::new(CollectingObserver::new());
        let mut driver = FuzzDriver::new(FuzzConfig {
            max_steps: 2,
            max_errors: 2,
            ..FuzzConfig::default()
        })
        .unwrap()
        .with_violation_observer(observer.clone());
        assert_eq!(driver.run_seeds(&Walker::default(), 1..=2).unwrap().len(), 2);
        assert!(matches!(
            driver.run_seeded(&Walker::default(), 3),
            Err(TurnsError::FuzzAborted {
                errors: 2,
                max_errors: 2
            })
        ));
        let reported = observer.violations_of_kind(ViolationKind::Fuzz);
        assert_eq!(reported.len(), 2);
        assert!(reported.iter().all(|v| v.step == Some(2)));
        assert!(reported[0].message.starts_with("MaxSteps"));
    }

    #[test]
    fn artifacts_are_written_and_reproduce() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = FuzzDriver::new(
            FuzzConfig {
                max_steps: 40,
                timeout: Duration::from_secs(60),
                ..FuzzConfig::default()
            }
            .with_crash_dir(dir.path()),
        )
        .unwrap();
        let report = driver.run_seeded(&Tally, 11).unwrap().unwrap();
        let path = report.path.clone().unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("crash-max-steps-"));
        let artifact = CrashArtifact::read_from(&path).unwrap();
        assert_eq!(artifact.reproduce(&Tally).unwrap(), artifact.state);
    }

    #[test]
    fn same_seed_same_walk() {
        let a = driver(30).run_seeded(&Tally, 99).unwrap().unwrap();
        let b = driver(30).run_seeded(&Tally, 99).unwrap().unwrap();
        assert_eq!(a.artifact, b.artifact);
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}
