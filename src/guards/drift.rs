//! Goal-drift detection.
//!
//! Each of the trailing steps is scored by how many salient task terms it
//! shares, using the overlap coefficient `|T ∩ S| / min(|T|, |S|)`. The mean
//! score and the share of low-scoring steps map to a severity:
//!
//! | severity | condition                                  |
//! |----------|--------------------------------------------|
//! | severe   | mean < 0.1 and at least 80% of steps low   |
//! | moderate | mean < 0.2 or at least 60% of steps low    |
//! | mild     | mean < 0.4 or at least 40% of steps low    |
//!
//! [`assess_drift`] classifies any non-empty window, even a single step.
//! The warm-up of `drift_min_steps` applies only to the detector the step
//! loop runs, so a run is not redirected on its first move.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Detection, PatternKind};
use crate::agent::{Action, Step};
use crate::config::GuardConfig;

const MIN_TERM_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new", "now", "old",
    "see", "two", "who", "did", "get", "use", "that", "this", "with", "from", "they", "will",
    "would", "there", "their", "what", "about", "which", "when", "make", "like", "time", "just",
    "know", "take", "into", "your", "some", "could", "them", "than", "then", "also", "been",
    "only", "over", "such", "were", "each", "other", "these", "those", "more", "most", "very",
    "should", "does", "doing", "done", "here", "where", "while", "please", "need", "want",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    None,
    Mild,
    Moderate,
    Severe,
}

/// Relevance summary of the scored window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAssessment {
    pub severity: DriftSeverity,
    pub mean_relevance: f64,
    pub low_relevance_steps: usize,
    pub scored_steps: usize,
}

/// Lowercased terms of at least three characters, stop words removed.
pub fn salient_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

fn step_text(step: &Step) -> String {
    let mut parts = Vec::new();
    match &step.action {
        Action::ToolCalls { calls } => {
            for call in calls {
                parts.push(call.name.clone());
                parts.push(call.arguments.to_string());
            }
        }
        Action::Code { source } => parts.push(source.clone()),
        Action::Text { content } => parts.push(content.clone()),
    }
    if let Some(observation) = &step.observation {
        parts.push(observation.clone());
    }
    parts.join(" ")
}

fn relevance(task_terms: &BTreeSet<String>, step_terms: &BTreeSet<String>) -> f64 {
    let smaller = task_terms.len().min(step_terms.len());
    if smaller == 0 {
        return 0.0;
    }
    task_terms.intersection(step_terms).count() as f64 / smaller as f64
}

/// Score the trailing window. `None` when the task has no salient terms or
/// there are no steps.
pub fn assess_drift(task: &str, steps: &[Step], config: &GuardConfig) -> Option<DriftAssessment> {
    let task_terms = salient_terms(task);
    if task_terms.is_empty() {
        return None;
    }
    let window = &steps[steps.len().saturating_sub(config.drift_window.max(1))..];
    if window.is_empty() {
        return None;
    }

    let scores: Vec<f64> = window
        .iter()
        .map(|step| relevance(&task_terms, &salient_terms(&step_text(step))))
        .collect();
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let low = scores
        .iter()
        .filter(|&&score| score < config.low_relevance_threshold)
        .count();
    let low_frac = low as f64 / scores.len() as f64;

    let severity = if mean < 0.1 && low_frac >= 0.8 {
        DriftSeverity::Severe
    } else if mean < 0.2 || low_frac >= 0.6 {
        DriftSeverity::Moderate
    } else if mean < 0.4 || low_frac >= 0.4 {
        DriftSeverity::Mild
    } else {
        DriftSeverity::None
    };

    Some(DriftAssessment {
        severity,
        mean_relevance: mean,
        low_relevance_steps: low,
        scored_steps: scores.len(),
    })
}

pub(crate) fn detect_drift(task: &str, steps: &[Step], config: &GuardConfig) -> Option<Detection> {
    if steps.len().min(config.drift_window.max(1)) < config.drift_min_steps {
        return None;
    }
    let assessment = assess_drift(task, steps, config)?;
    let guidance = match assessment.severity {
        DriftSeverity::None => return None,
        DriftSeverity::Mild => format!(
            "Your recent steps are drifting from the task. Refocus on: {}",
            task
        ),
        DriftSeverity::Moderate => format!(
            "Most of your recent steps are unrelated to the task. Stop exploring tangents \
             and work directly on: {}",
            task
        ),
        DriftSeverity::Severe => "You have lost track of the task. Stop now and give your \
             final answer using what you already know."
            .to_string(),
    };
    Some(Detection {
        pattern: PatternKind::GoalDrift,
        count: assessment.low_relevance_steps,
        guidance,
        severity: Some(assessment.severity),
    })
}
