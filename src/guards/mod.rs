//! Self-correcting guard detectors.
//!
//! Guards are pure functions over the step history. They never stop a run on
//! their own: a [`Detection`] carries guidance text that the step loop shows
//! to the model before the next step. Severe goal drift is the one exception
//! the loop acts on, by granting a single final step.

pub mod drift;
pub mod repetition;

use serde::{Deserialize, Serialize};

use crate::agent::Step;
use crate::config::GuardConfig;

pub use drift::{assess_drift, salient_terms, DriftAssessment, DriftSeverity};
pub use repetition::{detect_repetition, trigram_similarity};

/// The kind of unproductive pattern a guard found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    ToolCall,
    Code,
    Observation,
    GoalDrift,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PatternKind::ToolCall => "tool_call",
            PatternKind::Code => "code",
            PatternKind::Observation => "observation",
            PatternKind::GoalDrift => "goal_drift",
        };
        write!(f, "{}", name)
    }
}

/// A guard finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub pattern: PatternKind,
    /// Evidence count: repeated steps, or off-task steps for drift.
    pub count: usize,
    pub guidance: String,
    /// Set for goal drift only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<DriftSeverity>,
}

impl Detection {
    pub fn is_severe_drift(&self) -> bool {
        self.severity == Some(DriftSeverity::Severe)
    }
}

/// The configured guards of one agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardSet {
    config: GuardConfig,
}

impl GuardSet {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Run every guard. Repetition comes first when both fire.
    pub fn check(&self, task: &str, steps: &[Step]) -> Vec<Detection> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut detections = Vec::new();
        if let Some(detection) = detect_repetition(
            steps,
            self.config.repetition_window,
            self.config.similarity_threshold,
        ) {
            detections.push(detection);
        }
        if let Some(detection) = drift::detect_drift(task, steps, &self.config) {
            detections.push(detection);
        }
        detections
    }
}
