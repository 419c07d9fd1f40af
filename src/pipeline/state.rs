//! Pipeline lifecycle states.
//!
//! A question moves strictly forward:
//! Idle → Generating → Executing → BuildingContext → Synthesizing → Done,
//! and any non-initial state may end in `Failed(stage)`. No state is revisited.

use serde::{Deserialize, Serialize};

/// A pipeline stage, as reported by a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generation,
    Execution,
    Context,
    Synthesis,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::Execution => write!(f, "execution"),
            Self::Context => write!(f, "context"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// State of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Generating,
    Executing,
    BuildingContext,
    Synthesizing,
    Done,
    Failed(Stage),
}

impl PipelineState {
    /// The stage this state runs, if any.
    pub fn stage(self) -> Option<Stage> {
        match self {
            Self::Generating => Some(Stage::Generation),
            Self::Executing => Some(Stage::Execution),
            Self::BuildingContext => Some(Stage::Context),
            Self::Synthesizing => Some(Stage::Synthesis),
            Self::Idle | Self::Done | Self::Failed(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Generating)
            | (Self::Generating, Self::Executing)
            | (Self::Executing, Self::BuildingContext)
            | (Self::BuildingContext, Self::Synthesizing)
            | (Self::Synthesizing, Self::Done) => true,
            // A stage may only fail while it is running.
            (current, Self::Failed(stage)) => current.stage() == Some(stage),
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Generating => write!(f, "Generating"),
            Self::Executing => write!(f, "Executing"),
            Self::BuildingContext => write!(f, "BuildingContext"),
            Self::Synthesizing => write!(f, "Synthesizing"),
            Self::Done => write!(f, "Done"),
            Self::Failed(stage) => write!(f, "Failed({stage})"),
        }
    }
}

/// Forward-only state tracker for one invocation.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to `next`. Illegal transitions are a programming error.
    pub(crate) fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal pipeline transition {} -> {next}",
            self.state
        );
        tracing::debug!(from = %self.state, to = %next, "pipeline transition");
        self.state = next;
        self.history.push(next);
    }

    /// States visited, ending in a terminal one.
    pub(crate) fn into_history(self) -> Vec<PipelineState> {
        debug_assert!(self.state().is_terminal(), "pipeline stopped in {}", self.state);
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [PipelineState; 6] = [
        PipelineState::Idle,
        PipelineState::Generating,
        PipelineState::Executing,
        PipelineState::BuildingContext,
        PipelineState::Synthesizing,
        PipelineState::Done,
    ];

    #[test]
    fn happy_path_is_legal() {
        for pair in HAPPY_PATH.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn no_state_is_revisited_or_skipped() {
        assert!(!PipelineState::Executing.can_transition_to(PipelineState::Generating));
        assert!(!PipelineState::Generating.can_transition_to(PipelineState::Synthesizing));
        assert!(!PipelineState::Done.can_transition_to(PipelineState::Idle));
        assert!(!PipelineState::Idle.can_transition_to(PipelineState::Done));
    }

    #[test]
    fn failure_only_from_the_running_stage() {
        assert!(
            PipelineState::Executing.can_transition_to(PipelineState::Failed(Stage::Execution))
        );
        assert!(
            !PipelineState::Executing.can_transition_to(PipelineState::Failed(Stage::Synthesis))
        );
        assert!(!PipelineState::Idle.can_transition_to(PipelineState::Failed(Stage::Generation)));
        assert!(!PipelineState::Done.can_transition_to(PipelineState::Failed(Stage::Synthesis)));
        assert!(PipelineState::Failed(Stage::Execution).is_terminal());
    }

    #[test]
    fn machine_records_history() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::Generating);
        sm.advance(PipelineState::Executing);
        sm.advance(PipelineState::Failed(Stage::Execution));
        assert_eq!(sm.state(), PipelineState::Failed(Stage::Execution));
        assert_eq!(
            sm.into_history(),
            [
                PipelineState::Idle,
                PipelineState::Generating,
                PipelineState::Executing,
                PipelineState::Failed(Stage::Execution),
            ]
        );
    }

    #[test]
    fn display_names() {
        assert_eq!(PipelineState::Failed(Stage::Execution).to_string(), "Failed(execution)");
        assert_eq!(Stage::Context.to_string(), "context");
    }
}
