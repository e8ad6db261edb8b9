//! Winner selection across evaluated candidates.

use serde::{Deserialize, Serialize};
use tracing::debug;

use bw_models::Metric;

use crate::evaluator::Candidate;

/// Secondary ordering used when primary scores are exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lower measured inference time wins.
    InferenceTime,
    /// The earlier candidate always wins.
    None,
}

/// Running state of a selection: empty until the first candidate arrives,
/// then only ever replaced by a strictly better candidate.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    best: Option<Candidate>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    pub fn into_winner(self) -> Option<Candidate> {
        self.best
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selector {
    primary_metric: Metric,
    tie_break: TieBreak,
}

impl Selector {
    pub fn new(primary_metric: Metric, tie_break: TieBreak) -> Self {
        Self {
            primary_metric,
            tie_break,
        }
    }

    pub fn primary_metric(&self) -> Metric {
        self.primary_metric
    }

    /// Whether `challenger` should replace `incumbent`.
    ///
    /// Scores are compared exactly. Equal scores fall through to the tie
    /// break, and a full tie keeps the incumbent.
    pub fn beats(&self, challenger: &Candidate, incumbent: &Candidate) -> bool {
        let new_score = challenger.score(self.primary_metric);
        let old_score = incumbent.score(self.primary_metric);
        if new_score > old_score {
            return true;
        }
        new_score == old_score
            && match self.tie_break {
                TieBreak::InferenceTime => challenger.inference_time < incumbent.inference_time,
                TieBreak::None => false,
            }
    }

    /// Fold one candidate into the state. Returns true when it became the
    /// new best.
    pub fn consider(&self, state: &mut SelectionState, candidate: Candidate) -> bool {
        let replace = match &state.best {
            None => true,
            Some(current) => self.beats(&candidate, current),
        };
        if replace {
            debug!(
                "{} leads with {} = {:.4} ({:.6}s inference)",
                candidate.name,
                self.primary_metric,
                candidate.score(self.primary_metric),
                candidate.inference_time
            );
            state.best = Some(candidate);
        }
        replace
    }

    /// Winner of `candidates` taken in arrival order, or `None` when empty.
    pub fn select(&self, candidates: impl IntoIterator<Item = Candidate>) -> Option<Candidate> {
        let mut state = SelectionState::new();
        for candidate in candidates {
            self.consider(&mut state, candidate);
        }
        state.into_winner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::tests::candidate;

    #[test]
    fn empty_sequence_has_no_winner() {
        let selector = Selector::new(Metric::F1Macro, TieBreak::InferenceTime);
        assert!(selector.select(Vec::new()).is_none());
    }

    #[test]
    fn equal_score_lower_latency_wins() {
        let selector = Selector::new(Metric::F1Macro, TieBreak::InferenceTime);
        let winner = selector
            .select(vec![
                candidate("a", 0.80, 0.01),
                candidate("b", 0.91, 0.02),
                candidate("c", 0.91, 0.01),
            ])
            .unwrap();
        assert_eq!(winner.name, "c");
    }

    #[test]
    fn full_tie_keeps_first_arrival() {
        let selector = Selector::new(Metric::F1Macro, TieBreak::InferenceTime);
        let winner = selector
            .select(vec![candidate("a", 0.9, 0.01), candidate("b", 0.9, 0.01)])
            .unwrap();
        assert_eq!(winner.name, "a");
    }

    #[test]
    fn no_tie_break_keeps_first_on_equal_score() {
        let selector = Selector::new(Metric::F1Macro, TieBreak::None);
        let winner = selector
            .select(vec![candidate("a", 0.9, 0.05), candidate("b", 0.9, 0.01)])
            .unwrap();
        assert_eq!(winner.name, "a");
    }

    #[test]
    fn higher_score_beats_faster_model() {
        let selector = Selector::new(Metric::F1Macro, TieBreak::InferenceTime);
        let winner = selector
            .select(vec![candidate("fast", 0.90, 0.001), candidate("slow", 0.95, 1.0)])
            .unwrap();
        assert_eq!(winner.name, "slow");
    }

    #[test]
    fn state_only_moves_forward() {
        let selector = Selector::new(Metric::F1Macro, TieBreak::InferenceTime);
        let mut state = SelectionState::new();
        assert!(selector.consider(&mut state, candidate("a", 0.9, 0.01)));
        assert!(!selector.consider(&mut state, candidate("b", 0.5, 0.001)));
        assert_eq!(state.best().unwrap().name, "a");
    }

    #[test]
    fn primary_metric_is_configurable() {
        let mut a = candidate("a", 0.9, 0.01);
        a.report.accuracy = 0.70;
        let mut b = candidate("b", 0.8, 0.01);
        b.report.accuracy = 0.75;

        let by_f1 = Selector::new(Metric::F1Macro, TieBreak::None);
        assert_eq!(by_f1.select(vec![a.clone(), b.clone()]).unwrap().name, "a");
        let by_accuracy = Selector::new(Metric::Accuracy, TieBreak::None);
        assert_eq!(by_accuracy.select(vec![a, b]).unwrap().name, "b");
    }
}
