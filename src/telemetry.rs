//! Violation reporting.
//!
//! Rooms, replays and fuzz runs all call into rules modules they do not trust.
//! Whenever one of those calls misbehaves in a way the caller survives (a view
//! that throws mid-broadcast, a sink that has gone away, a walk that breaks the
//! undo contract) a [`Violation`] is handed to a [`ViolationObserver`].
//! Without an observer, violations go to `tracing`.
//!
//! ```
//! use fortress_turns::telemetry::{CollectingObserver, ViolationKind};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! // registry.with_violation_observer(observer.clone()) ...
//! assert!(!observer.has_violation(ViolationKind::Broadcast));
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// How bad a violation is, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// The caller fell back and carried on.
    Warning,
    /// One viewer, replay or fuzz run was lost.
    Error,
    /// Shared game bookkeeping may be inconsistent.
    Critical,
}

impl ViolationSeverity {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem that reported a violation.
///
/// # Forward Compatibility
///
/// This enum is `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// The generator was asked for an empty range.
    Random,
    /// A rules module failed to build a view.
    Projection,
    /// An event could not be handed to a connection's sink.
    Broadcast,
    /// A stored replay did not reconstruct.
    Replay,
    /// A fuzz walk found a misbehaving rules module.
    Fuzz,
    /// Room bookkeeping failed an invariant check.
    ///
    /// Only checked in debug builds or with the `paranoid` feature.
    Invariant,
}

impl ViolationKind {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Projection => "projection",
            Self::Broadcast => "broadcast",
            Self::Replay => "replay",
            Self::Fuzz => "fuzz",
            Self::Invariant => "invariant",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported violation.
///
/// ```
/// use fortress_turns::telemetry::{Violation, ViolationKind, ViolationSeverity};
///
/// let violation = Violation::new(
///     ViolationSeverity::Error,
///     ViolationKind::Fuzz,
///     "BadUndo: active changed with undo pending",
///     "driver.rs:42",
/// )
/// .with_step(7);
///
/// let json = violation.to_json().unwrap();
/// assert!(json.contains(r#""kind":"fuzz""#));
/// assert!(json.contains(r#""step":7"#));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// Who reported it.
    pub kind: ViolationKind,
    /// What happened.
    pub message: String,
    /// `file:line` of the report.
    pub location: &'static str,
    /// Replay or fuzz step, when the violation belongs to one.
    pub step: Option<usize>,
}

impl Violation {
    /// Creates a violation with no step.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            step: None,
        }
    }

    /// Ties the violation to a replay or fuzz step.
    #[must_use]
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    /// Compact JSON form, for shipping to log collectors.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.severity, self.kind, self.message)?;
        match self.step {
            Some(step) => write!(f, " (step {step}, {})", self.location),
            None => write!(f, " ({})", self.location),
        }
    }
}

/// Receives violations.
///
/// Rooms report while their game lock is held, so implementations should
/// return quickly.
///
/// ```
/// use fortress_turns::telemetry::{Violation, ViolationObserver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counting(AtomicUsize);
///
/// impl ViolationObserver for Counting {
///     fn on_violation(&self, _violation: &Violation) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait ViolationObserver: Send + Sync {
    /// Called once per reported violation.
    fn on_violation(&self, violation: &Violation);
}

/// Logs violations through `tracing`: warnings at `warn`, everything else at
/// `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let Violation {
            severity,
            kind,
            message,
            location,
            step,
        } = violation;
        if *severity == ViolationSeverity::Warning {
            tracing::warn!(kind = kind.as_str(), location, step = ?step, "{message}");
        } else {
            tracing::error!(
                severity = severity.as_str(),
                kind = kind.as_str(),
                location,
                step = ?step,
                "{message}"
            );
        }
    }
}

/// Keeps every violation in memory. Meant for tests.
///
/// ```
/// use fortress_turns::telemetry::{
///     CollectingObserver, Violation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Broadcast,
///     "sink closed",
///     "room.rs:1",
/// ));
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_violation(ViolationKind::Broadcast));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    seen: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// An observer with nothing collected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything collected so far, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.seen.lock().clone()
    }

    /// Number collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// `true` until the first violation arrives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Whether any collected violation is of `kind`.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.seen.lock().iter().any(|v| v.kind == kind)
    }

    /// Collected violations of `kind`, oldest first.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        self.seen
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Forgets everything collected.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.seen.lock().push(violation.clone());
    }
}

/// Hands `violation` to `observer`, or to [`TracingObserver`] when there is none.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &Violation,
) {
    match observer {
        Some(observer) => observer.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation straight to [`TracingObserver`], recording the call site.
///
/// ```text
/// report_violation!(severity, kind, "message");
/// report_violation!(severity, kind, "message with {}", args);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        $crate::telemetry::TracingObserver.on_violation(&$crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        ));
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        $crate::telemetry::TracingObserver.on_violation(&$crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        ));
    }};
}

/// Reports a violation through an `&Option<Arc<dyn ViolationObserver>>`.
///
/// ```
/// use fortress_turns::report_violation_to;
/// use fortress_turns::telemetry::{
///     CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
/// use std::sync::Arc;
///
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(Arc::new(CollectingObserver::new()));
/// report_violation_to!(&observer, ViolationSeverity::Warning, ViolationKind::Broadcast,
///     "dropped state event for connection {}", 3);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        $crate::telemetry::report_to_observer(
            $observer.as_ref(),
            &$crate::telemetry::Violation::new(
                $severity,
                $kind,
                $msg,
                concat!(file!(), ":", line!()),
            ),
        );
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        $crate::telemetry::report_to_observer(
            $observer.as_ref(),
            &$crate::telemetry::Violation::new(
                $severity,
                $kind,
                format!($fmt, $($arg)+),
                concat!(file!(), ":", line!()),
            ),
        );
    }};
}

/// Panics unless `observer` has collected a violation of `kind`.
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "no {:?} violation among {:#?}",
            $kind,
            $observer.violations()
        );
    }};
}

/// A broken bookkeeping invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Type whose bookkeeping is broken.
    pub type_name: &'static str,
    /// The rule that does not hold.
    pub invariant: String,
    /// Values that show it.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a violation without details.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Attaches the values that show the breakage.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {} ({details})", self.type_name, self.invariant),
            None => write!(f, "{}: {}", self.type_name, self.invariant),
        }
    }
}

/// Types whose internal bookkeeping can be checked at runtime.
pub trait InvariantChecker {
    /// # Errors
    ///
    /// Returns the first invariant found broken.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Runs [`InvariantChecker::check_invariants`] and reports a critical
/// violation on failure. Compiled out of release builds unless the `paranoid`
/// feature is on.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($expr:expr, $context:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} after {}",
                violation,
                $context
            );
        }
    }};
}

/// Runs [`InvariantChecker::check_invariants`] and reports a critical
/// violation on failure. Compiled out of release builds unless the `paranoid`
/// feature is on.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($expr:expr, $context:expr) => {{
        let _ = &$expr;
        let _ = &$context;
    }};
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

    fn dropped(kind: ViolationKind) -> Violation {
        Violation::new(ViolationSeverity::Warning, kind, "dropped", "room.rs:1")
    }

    #[test]
    fn severities_are_ordered() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn display_names_step_when_present() {
        let v = Violation::new(
            ViolationSeverity::Error,
            ViolationKind::Fuzz,
            "MaxSteps",
            "driver.rs:10",
        );
        assert_eq!(v.to_string(), "[error/fuzz] MaxSteps (driver.rs:10)");
        assert_eq!(
            v.with_step(4).to_string(),
            "[error/fuzz] MaxSteps (step 4, driver.rs:10)"
        );
    }

    #[test]
    fn json_keeps_missing_step_as_null() {
        let json = dropped(ViolationKind::Projection).to_json().unwrap();
        assert!(json.contains(r#""step":null"#));
        assert!(json.contains(r#""severity":"warning""#));
        assert!(json.contains(r#""kind":"projection""#));
    }

    #[test]
    fn collecting_observer_filters_by_kind() {
        let observer = CollectingObserver::new();
        observer.on_violation(&dropped(ViolationKind::Broadcast));
        observer.on_violation(&dropped(ViolationKind::Replay));
        observer.on_violation(&dropped(ViolationKind::Broadcast));

        assert_eq!(observer.len(), 3);
        assert_eq!(observer.violations_of_kind(ViolationKind::Broadcast).len(), 2);
        assert!(!observer.has_violation(ViolationKind::Fuzz));
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn report_violation_to_prefers_the_observer() {
        let collecting = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collecting.clone());
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::Broadcast,
            "dropped {} events",
            2
        );
        assert_violation!(collecting, ViolationKind::Broadcast);
        let seen = collecting.violations();
        assert_eq!(seen[0].message, "dropped 2 events");
        assert!(seen[0].location.starts_with("src/telemetry.rs:"));
    }

    #[test]
    fn report_violation_to_without_observer_logs() {
        let observer: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            &observer,
            ViolationSeverity::Critical,
            ViolationKind::Invariant,
            "nobody listening"
        );
    }

    #[test]
    fn invariant_violation_display() {
        let plain = InvariantViolation::new("GameRoom", "presence lists an observer");
        assert_eq!(plain.to_string(), "GameRoom: presence lists an observer");
        assert_eq!(
            plain.with_details("connections=2").to_string(),
            "GameRoom: presence lists an observer (connections=2)"
        );
    }
}
