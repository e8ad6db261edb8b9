//! Classification metrics.
//!
//! Macro averages are taken over the union of labels seen in `y_true` and
//! `y_pred`. A class with no predicted (or no true) members contributes zero
//! precision (or recall) instead of failing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use bw_types::ModelError;

/// Metric used to score trials and compare candidates. Higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    F1Macro,
    PrecisionMacro,
    RecallMacro,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Accuracy,
        Metric::F1Macro,
        Metric::PrecisionMacro,
        Metric::RecallMacro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::F1Macro => "f1_macro",
            Metric::PrecisionMacro => "precision_macro",
            Metric::RecallMacro => "recall_macro",
        }
    }

    pub fn score(&self, y_true: &[usize], y_pred: &[usize]) -> Result<f64, ModelError> {
        Ok(ClassificationReport::compute(y_true, y_pred)?.get(*self))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown metric {s:?}, expected one of accuracy, f1_macro, precision_macro, recall_macro"
                )
            })
    }
}

/// All metrics for one set of predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub f1_macro: f64,
    pub precision_macro: f64,
    pub recall_macro: f64,
}

impl ClassificationReport {
    pub fn compute(y_true: &[usize], y_pred: &[usize]) -> Result<Self, ModelError> {
        if y_true.len() != y_pred.len() {
            return Err(ModelError::ShapeMismatch {
                expected: y_true.len(),
                actual: y_pred.len(),
            });
        }
        if y_true.is_empty() {
            return Err(ModelError::TrainingFailed {
                message: "cannot score an empty prediction set".to_string(),
            });
        }

        // label -> (true positives, predicted count, actual count)
        let mut counts: BTreeMap<usize, (usize, usize, usize)> = BTreeMap::new();
        let mut correct = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            counts.entry(t).or_default().2 += 1;
            counts.entry(p).or_default().1 += 1;
            if t == p {
                correct += 1;
                counts.entry(t).or_default().0 += 1;
            }
        }

        let mut precision_sum = 0.0;
        let mut recall_sum = 0.0;
        let mut f1_sum = 0.0;
        for &(tp, predicted, actual) in counts.values() {
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, actual);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            precision_sum += precision;
            recall_sum += recall;
            f1_sum += f1;
        }
        let n_labels = counts.len() as f64;

        Ok(Self {
            accuracy: correct as f64 / y_true.len() as f64,
            f1_macro: f1_sum / n_labels,
            precision_macro: precision_sum / n_labels,
            recall_macro: recall_sum / n_labels,
        })
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Accuracy => self.accuracy,
            Metric::F1Macro => self.f1_macro,
            Metric::PrecisionMacro => self.precision_macro,
            Metric::RecallMacro => self.recall_macro,
        }
    }

    /// Metrics keyed by name, as written to a tracking run.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        Metric::ALL
            .into_iter()
            .map(|m| (m.as_str().to_string(), self.get(m)))
            .collect()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
