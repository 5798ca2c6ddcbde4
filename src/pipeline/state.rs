//! Pipeline state management

use std::time::Instant;

/// Pipeline state machine
///
/// A stream owns exactly one state at a time. `Stopped` and `Failed` end a
/// run; a new run may start from either of them, or from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No graph has been built yet
    Idle,

    /// The description is being resolved and stages are acquiring resources
    Building,

    /// Every stage is running
    Playing {
        /// When the graph reached the playing state
        started_at: Instant,
    },

    /// Stages are being halted and resources released
    Stopping,

    /// Teardown completed
    Stopped,

    /// The graph could not be built; nothing is held
    Failed,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            // A new run
            (Idle | Stopped | Failed, Building) => true,

            // From Building
            (Building, Playing { .. }) => true,
            (Building, Failed) => true,
            (Building, Stopping) => true, // cancelled before playing

            // From Playing
            (Playing { .. }, Stopping) => true,

            // From Stopping
            (Stopping, Stopped) => true,

            // All other transitions invalid, including self-transitions
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Building => "Building",
            PipelineState::Playing { .. } => "Playing",
            PipelineState::Stopping => "Stopping",
            PipelineState::Stopped => "Stopped",
            PipelineState::Failed => "Failed",
        }
    }

    /// A graph exists (or is being built or torn down)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineState::Building | PipelineState::Playing { .. } | PipelineState::Stopping
        )
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PipelineState::Playing { .. })
    }

    /// The last run ended, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }

    /// Get the duration since the pipeline started playing
    pub fn playing_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Playing { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
