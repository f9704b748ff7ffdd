//! Canonical ordering over raw predictions.
//!
//! Predictions are ordered by descending confidence, ties broken by ascending label, so equal
//! inputs always render in the same order regardless of what order the backend produced them in.

use crate::error::RunError;
use crate::model::Prediction;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Predictions in ranked order. Only constructed through [`rank`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct RankedPredictions(Vec<Prediction>);

impl RankedPredictions {
    pub fn as_slice(&self) -> &[Prediction] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.0.iter()
    }

    /// Highest-ranked prediction. An empty set is a backend contract violation.
    pub fn top(&self) -> Result<&Prediction, RunError> {
        self.0.first().ok_or(RunError::EmptySet)
    }
}

impl<'a> IntoIterator for &'a RankedPredictions {
    type Item = &'a Prediction;
    type IntoIter = std::slice::Iter<'a, Prediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Rank raw predictions. Rejects duplicate labels and confidences outside [0, 1];
/// nothing is returned on failure.
pub fn rank(raw: Vec<Prediction>) -> Result<RankedPredictions, RunError> {
    let mut seen = HashSet::with_capacity(raw.len());
    for p in &raw {
        if !seen.insert(p.label.as_str()) {
            return Err(RunError::DuplicateLabel(p.label.clone()));
        }
        if !(0.0..=1.0).contains(&p.confidence) {
            return Err(RunError::InvalidConfidence {
                label: p.label.clone(),
                confidence: p.confidence,
            });
        }
    }

    let mut ranked = raw;
    ranked.sort_by(compare);
    Ok(RankedPredictions(ranked))
}

fn compare(a: &Prediction, b: &Prediction) -> Ordering {
    // NaN is rejected above, so partial_cmp always succeeds here.
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.label.cmp(&b.label))
}

/// Display a confidence as a percentage with one decimal place, e.g. `0.925` -> `"92.5%"`.
pub fn format_percent(confidence: f64) -> String {
    // Adding +0.0 turns -0.0 into 0.0 so it never renders as "-0.0%".
    format!("{:.1}%", confidence * 100.0 + 0.0)
}
