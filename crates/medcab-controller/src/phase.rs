//! Workflow phase of the controller.
//!
//! ```text
//!            unlock()            ack SUCCESS            status: locked
//!   Idle ───────────► Unlocking ───────────► AwaitingLockBack ──────────► Idle
//!    │
//!    │    dispense()            ack SUCCESS                 status: locked
//!    └────────────► Dispensing ───────────► AwaitingDispenseLockBack ────► Idle
//! ```
//!
//! Any phase may return to `Idle` (rejection, deactivation, emergency
//! stop). Every other move is refused, so a phase can never be skipped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Transitions kept for diagnostics.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerPhase {
    #[default]
    Idle,
    Unlocking,
    AwaitingLockBack,
    Dispensing,
    AwaitingDispenseLockBack,
}

impl ControllerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Unlocking => "unlocking",
            Self::AwaitingLockBack => "awaiting-lock-back",
            Self::Dispensing => "dispensing",
            Self::AwaitingDispenseLockBack => "awaiting-dispense-lock-back",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Waiting for a slot to be pushed shut.
    pub fn awaits_lock_back(&self) -> bool {
        matches!(self, Self::AwaitingLockBack | Self::AwaitingDispenseLockBack)
    }

    fn can_move_to(self, next: ControllerPhase) -> bool {
        matches!(
            (self, next),
            (_, Self::Idle)
                | (Self::Idle, Self::Unlocking)
                | (Self::Idle, Self::Dispensing)
                | (Self::Unlocking, Self::AwaitingLockBack)
                | (Self::Dispensing, Self::AwaitingDispenseLockBack)
        )
    }
}

impl fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid phase transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ControllerPhase,
    pub to: ControllerPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub from: ControllerPhase,
    pub to: ControllerPhase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// The current phase plus a bounded transition history.
#[derive(Debug, Default)]
pub struct PhaseMachine {
    phase: ControllerPhase,
    history: VecDeque<PhaseTransition>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// [`InvalidTransition`] if the move skips a step; the phase is unchanged.
    pub fn transition(
        &mut self,
        next: ControllerPhase,
        reason: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.phase.can_move_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.record(next, reason.into());
        Ok(())
    }

    /// Return to `Idle` from anywhere. Returns the phase that was left.
    pub fn reset(&mut self, reason: impl Into<String>) -> ControllerPhase {
        let previous = self.phase;
        if !previous.is_idle() {
            self.record(ControllerPhase::Idle, reason.into());
        }
        previous
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PhaseTransition> {
        self.history.iter()
    }

    fn record(&mut self, next: ControllerPhase, reason: String) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(PhaseTransition {
            from: self.phase,
            to: next,
            reason,
            at: Utc::now(),
        });
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ControllerPhase::*;
    use rstest::rstest;

    #[test]
    fn test_load_workflow() {
        let mut machine = PhaseMachine::new();
        machine.transition(Unlocking, "unlock").unwrap();
        machine.transition(AwaitingLockBack, "ack").unwrap();
        machine.transition(Idle, "locked back").unwrap();

        let path: Vec<_> = machine.history().map(|t| t.to).collect();
        assert_eq!(path, vec![Unlocking, AwaitingLockBack, Idle]);
    }

    #[rstest]
    #[case(Idle, AwaitingLockBack)]
    #[case(Idle, AwaitingDispenseLockBack)]
    #[case(Unlocking, Dispensing)]
    #[case(Unlocking, AwaitingDispenseLockBack)]
    #[case(Dispensing, AwaitingLockBack)]
    #[case(AwaitingLockBack, Unlocking)]
    fn test_skipping_steps_is_refused(#[case] from: ControllerPhase, #[case] to: ControllerPhase) {
        let mut machine = PhaseMachine {
            phase: from,
            history: VecDeque::new(),
        };
        assert_eq!(
            machine.transition(to, "test"),
            Err(InvalidTransition { from, to })
        );
        assert_eq!(machine.phase(), from);
    }

    #[rstest]
    #[case(Idle)]
    #[case(Unlocking)]
    #[case(AwaitingLockBack)]
    #[case(Dispensing)]
    #[case(AwaitingDispenseLockBack)]
    fn test_reset_always_idles(#[case] from: ControllerPhase) {
        let mut machine = PhaseMachine {
            phase: from,
            history: VecDeque::new(),
        };
        assert_eq!(machine.reset("deactivate"), from);
        assert!(machine.phase().is_idle());
        assert_eq!(machine.history().count(), usize::from(!from.is_idle()));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = PhaseMachine::new();
        for _ in 0..HISTORY_CAPACITY {
            machine.transition(Unlocking, "unlock").unwrap();
            machine.transition(Idle, "rejected").unwrap();
        }
        assert_eq!(machine.history().count(), HISTORY_CAPACITY);
        assert_eq!(machine.history().last().map(|t| t.to), Some(Idle));
    }
}
