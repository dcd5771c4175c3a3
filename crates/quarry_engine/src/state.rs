//! The job-run state machine.
//!
//! Transitions are validated here and nowhere else; callers hold the
//! per-job lock while applying one. Terminal states are never left.

use quarry_protocol::types::JobState;
use thiserror::Error;

/// External and internal actions that move a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// User start / resume.
    Start,
    /// Cooperative pause; takes effect at the next safepoint.
    Pause,
    /// Cooperative cancel from any non-terminal state.
    Cancel,
    /// Every target reached its end (or failed); drain the pipeline.
    AllTargetsDone,
    /// Pipeline drained and counters flushed.
    Flush,
    /// Storage loss or invariant violation.
    FatalError,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition: {action:?} from {from:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub action: JobAction,
}

/// Apply an action, returning the next state.
pub fn apply(from: JobState, action: JobAction) -> Result<JobState, InvalidTransition> {
    use JobAction::*;
    use JobState::*;

    let next = match (from, action) {
        (Queued, Start) | (Paused, Start) => Running,
        (Running, Pause) => Paused,
        (Queued, Cancel) | (Running, Cancel) | (Paused, Cancel) => Cancelled,
        (Running, AllTargetsDone) => Completing,
        (Completing, Flush) => Completed,
        (Running, FatalError) | (Completing, FatalError) => Failed,
        _ => return Err(InvalidTransition { from, action }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn documented_paths_hold() {
        use JobState::*;
        assert_eq!(apply(Queued, JobAction::Start).unwrap(), Running);
        assert_eq!(apply(Running, JobAction::Pause).unwrap(), Paused);
        assert_eq!(apply(Paused, JobAction::Start).unwrap(), Running);
        assert_eq!(apply(Running, JobAction::AllTargetsDone).unwrap(), Completing);
        assert_eq!(apply(Completing, JobAction::Flush).unwrap(), Completed);
        assert_eq!(apply(Running, JobAction::FatalError).unwrap(), Failed);
        assert_eq!(apply(Paused, JobAction::Cancel).unwrap(), Cancelled);
    }

    #[test]
    fn invalid_edges_are_rejected() {
        use JobState::*;
        assert!(apply(Queued, JobAction::Pause).is_err());
        assert!(apply(Completed, JobAction::Start).is_err());
        assert!(apply(Cancelled, JobAction::Start).is_err());
        assert!(apply(Failed, JobAction::Cancel).is_err());
        assert!(apply(Completing, JobAction::Pause).is_err());
    }

    fn arb_action() -> impl Strategy<Value = JobAction> {
        prop_oneof![
            Just(JobAction::Start),
            Just(JobAction::Pause),
            Just(JobAction::Cancel),
            Just(JobAction::AllTargetsDone),
            Just(JobAction::Flush),
            Just(JobAction::FatalError),
        ]
    }

    proptest! {
        /// No sequence of actions, however interleaved, ever leaves a
        /// terminal state or reaches an undeclared state.
        #[test]
        fn terminal_states_are_sticky(actions in proptest::collection::vec(arb_action(), 1..64)) {
            let mut state = JobState::Queued;
            for action in actions {
                let was_terminal = state.is_terminal();
                match apply(state, action) {
                    Ok(next) => {
                        prop_assert!(!was_terminal, "left terminal state {state:?}");
                        state = next;
                    }
                    Err(_) => {}
                }
            }
        }
    }
}
