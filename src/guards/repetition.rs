//! Repetition detection over the trailing steps.
//!
//! Three signals are checked in priority order and the first that fires wins:
//! tool-call signature, whitespace-normalized code, observation text. Tool
//! signatures must match exactly. Code and observations match exactly or by
//! character-trigram Jaccard similarity at or above the threshold.
//!
//! The reported count is the length of the trailing run of matching steps,
//! so it keeps growing while the agent stays stuck.

use std::collections::HashSet;

use super::{Detection, PatternKind};
use crate::agent::Step;
use crate::util::normalize_whitespace;

/// Detect `window` or more consecutive matching steps at the end of `steps`.
pub fn detect_repetition(steps: &[Step], window: usize, threshold: f64) -> Option<Detection> {
    if window == 0 || steps.len() < window {
        return None;
    }

    let by_signature = trailing_run(steps, |step| step.action.tool_signature(), |a, b| a == b);
    if by_signature >= window {
        let signature = steps.last()?.action.tool_signature()?;
        return Some(Detection {
            pattern: PatternKind::ToolCall,
            count: by_signature,
            guidance: format!(
                "You have made the same tool call `{}` {} times in a row. Repeating it will \
                 not produce new information. Try a different tool or different arguments, \
                 or give your final answer with what you have.",
                signature, by_signature
            ),
            severity: None,
        });
    }

    let similar = |a: &String, b: &String| a == b || trigram_similarity(a, b) >= threshold;

    let by_code = trailing_run(
        steps,
        |step| step.action.code().map(normalize_whitespace),
        similar,
    );
    if by_code >= window {
        return Some(Detection {
            pattern: PatternKind::Code,
            count: by_code,
            guidance: format!(
                "You have run essentially the same code {} times in a row. Change your \
                 approach instead of re-running it.",
                by_code
            ),
            severity: None,
        });
    }

    let by_observation = trailing_run(
        steps,
        |step| {
            step.observation
                .as_deref()
                .map(normalize_whitespace)
                .filter(|text| !text.is_empty())
        },
        similar,
    );
    if by_observation >= window {
        return Some(Detection {
            pattern: PatternKind::Observation,
            count: by_observation,
            guidance: format!(
                "The last {} steps all produced the same result. You are not making \
                 progress; try something different or give your final answer.",
                by_observation
            ),
            severity: None,
        });
    }

    None
}

/// Length of the run, ending at the last step, whose keys match the last key.
fn trailing_run<K>(
    steps: &[Step],
    key: impl Fn(&Step) -> Option<K>,
    matches: impl Fn(&K, &K) -> bool,
) -> usize {
    let Some(anchor) = steps.last().and_then(&key) else {
        return 0;
    };
    steps
        .iter()
        .rev()
        .take_while(|&step| key(step).is_some_and(|k| matches(&k, &anchor)))
        .count()
}

/// Jaccard similarity of the character-trigram sets of `a` and `b`.
///
/// Strings shorter than three characters are compared for equality.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}
