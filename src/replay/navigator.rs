//! Checkpoint navigation over a reconstructed replay.

use crate::replay::{apply_entry, AnnotatedEntry};
use crate::rules::Rules;
use crate::state::GameState;
use crate::TurnsError;

/// Fast-forward / rewind over annotated entries.
///
/// A position `p` means "after the first `p` entries". Checkpoint entry `i`
/// sits at the turn boundary before it, so jumping to it lands on position `i`.
///
/// # Examples
///
/// ```ignore
/// let mut nav = ReplayNavigator::new(&rules, reconstruction.entries);
/// nav.next_checkpoint();
/// let state = nav.state()?;
/// ```
pub struct ReplayNavigator<'r> {
    rules: &'r dyn Rules,
    entries: Vec<AnnotatedEntry>,
    position: usize,
}

impl<'r> ReplayNavigator<'r> {
    /// Starts at position 0 (before setup).
    #[must_use]
    pub fn new(rules: &'r dyn Rules, entries: Vec<AnnotatedEntry>) -> Self {
        Self {
            rules,
            entries,
            position: 0,
        }
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there is nothing to navigate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries being navigated.
    #[must_use]
    pub fn entries(&self) -> &[AnnotatedEntry] {
        &self.entries
    }

    /// Moves to `position`, clamped to the end. Returns the new position.
    pub fn seek(&mut self, position: usize) -> usize {
        self.position = position.min(self.entries.len());
        self.position
    }

    /// Moves one entry forward.
    pub fn step_forward(&mut self) -> usize {
        self.seek(self.position.saturating_add(1))
    }

    /// Moves one entry back.
    pub fn step_back(&mut self) -> usize {
        self.seek(self.position.saturating_sub(1))
    }

    /// Moves to the next checkpoint after the current position, or the end.
    pub fn next_checkpoint(&mut self) -> usize {
        let target = self
            .entries
            .iter()
            .enumerate()
            .skip(self.position + 1)
            .find(|(_, e)| e.is_checkpoint)
            .map_or(self.entries.len(), |(i, _)| i);
        self.seek(target)
    }

    /// Moves to the last checkpoint before the current position, or the start.
    pub fn previous_checkpoint(&mut self) -> usize {
        let target = self.entries[..self.position]
            .iter()
            .rposition(|e| e.is_checkpoint)
            .unwrap_or(0);
        self.seek(target)
    }

    /// State at the current position.
    ///
    /// # Errors
    ///
    /// See [`state_at`](Self::state_at).
    pub fn state(&self) -> Result<Option<GameState>, TurnsError> {
        self.state_at(self.position)
    }

    /// Re-runs the rules from the start up to `position`.
    ///
    /// Returns `None` at position 0.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::ReplayCorrupt`] if any step fails.
    pub fn state_at(&self, position: usize) -> Result<Option<GameState>, TurnsError> {
        let end = position.min(self.entries.len());
        let mut state = None;
        for (step, annotated) in self.entries[..end].iter().enumerate() {
            let next = apply_entry(self.rules, state.as_ref(), &annotated.entry).map_err(
                |cause| TurnsError::ReplayCorrupt {
                    step,
                    cause: Box::new(cause),
                },
            )?;
            state = Some(next);
        }
        Ok(state)
    }
}

impl std::fmt::Debug for ReplayNavigator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            rules,
            entries,
            position,
        } = self;

        f.debug_struct("ReplayNavigator")
            .field("title", &rules.title())
            .field("entries", &entries.len())
            .field("position", position)
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
    use crate::replay::tests::{setup_entry, Tally};
    use crate::replay::{reconstruct, ReplayEntry, ReplayMode};
    use crate::Role;
    use serde_json::{json, Value};

    fn navigator() -> ReplayNavigator<'static> {
        let entries = vec![
            setup_entry(),
            ReplayEntry::action(Role::new("A"), "add", json!(1)),
            ReplayEntry::action(Role::new("A"), "pass", Value::Null),
            ReplayEntry::action(Role::new("B"), "add", json!(2)),
            ReplayEntry::action(Role::new("B"), "pass", Value::Null),
            ReplayEntry::action(Role::new("A"), "add", json!(5)),
        ];
        let result = reconstruct(&Tally, &entries, ReplayMode::Normal).unwrap();
        ReplayNavigator::new(&Tally, result.entries)
    }

    #[test]
    fn jumps_between_turn_boundaries() {
        let mut nav = navigator();
        assert_eq!(nav.next_checkpoint(), 3);
        assert_eq!(nav.next_checkpoint(), 5);
        assert_eq!(nav.next_checkpoint(), 6);
        assert_eq!(nav.next_checkpoint(), 6);
        assert_eq!(nav.previous_checkpoint(), 5);
        assert_eq!(nav.previous_checkpoint(), 3);
        assert_eq!(nav.previous_checkpoint(), 0);
        assert_eq!(nav.previous_checkpoint(), 0);
    }

    #[test]
    fn state_at_replays_prefix() {
        let mut nav = navigator();
        assert!(nav.state().unwrap().is_none());
        nav.seek(3);
        let state = nav.state().unwrap().unwrap();
        assert_eq!(state.get("active"), Some(&json!("B")));
        assert_eq!(state.get("total"), Some(&json!(1)));
        let end = nav.state_at(100).unwrap().unwrap();
        assert_eq!(end.get("total"), Some(&json!(8)));
    }

    #[test]
    fn stepping_is_clamped() {
        let mut nav = navigator();
        assert_eq!(nav.step_back(), 0);
        nav.seek(99);
        assert_eq!(nav.position(), nav.len());
        assert_eq!(nav.step_forward(), nav.len());
        assert_eq!(nav.step_back(), nav.len() - 1);
    }
}
