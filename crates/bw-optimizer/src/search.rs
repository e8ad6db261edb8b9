//! Search space definitions and parameter sampling strategies.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One sampled parameter assignment, keyed by parameter name.
pub type ParamSet = BTreeMap<String, ParameterValue>;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Constructor parameter name (e.g. "max_depth").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive, sampled log-uniformly.
    LogIntRange { low: i64, high: i64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

impl ParameterKind {
    /// Check the declaration itself is samplable.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::FloatRange { low, high } => {
                if !(low.is_finite() && high.is_finite()) || low > high {
                    return Err(format!("invalid float bounds [{low}, {high}]"));
                }
            }
            Self::IntRange { low, high } => {
                if low > high {
                    return Err(format!("invalid int bounds [{low}, {high}]"));
                }
            }
            Self::LogUniform { low, high } => {
                if !(low.is_finite() && high.is_finite()) || *low <= 0.0 || low > high {
                    return Err(format!("log-scale bounds must satisfy 0 < low <= high, got [{low}, {high}]"));
                }
            }
            Self::LogIntRange { low, high } => {
                if *low < 1 || low > high {
                    return Err(format!("log-scale int bounds must satisfy 1 <= low <= high, got [{low}, {high}]"));
                }
            }
            Self::Choice { values } => {
                if values.is_empty() {
                    return Err("categorical parameter needs at least one choice".to_string());
                }
            }
        }
        Ok(())
    }

    /// Whether `value` lies inside the declared bounds or choices.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::FloatRange { low, high }, ParameterValue::Float(v))
            | (Self::LogUniform { low, high }, ParameterValue::Float(v)) => *v >= *low && *v <= *high,
            (Self::IntRange { low, high }, ParameterValue::Int(v))
            | (Self::LogIntRange { low, high }, ParameterValue::Int(v)) => *v >= *low && *v <= *high,
            (Self::Choice { values }, ParameterValue::Json(v)) => values.contains(v),
            _ => false,
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::FloatRange { low, high } => ParameterValue::Float(rng.gen_range(*low..=*high)),
            Self::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                // exp(ln(x)) can land an ulp outside the range.
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            Self::LogIntRange { low, high } => {
                let log_low = (*low as f64).ln();
                let log_high = (high.saturating_add(1) as f64).ln();
                // Bounds this wide collapse to one f64 near i64::MAX.
                if log_high <= log_low {
                    return ParameterValue::Int(*low);
                }
                let log_val: f64 = rng.gen_range(log_low..log_high);
                ParameterValue::Int((log_val.exp().floor() as i64).clamp(*low, *high))
            }
            Self::Choice { values } => {
                let idx = rng.gen_range(0..values.len());
                ParameterValue::Json(values[idx].clone())
            }
        }
    }
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    /// `null` choices stand for "use the constructor default".
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Json(serde_json::Value::Null))
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::FloatRange { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_log_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(name, ParameterKind::LogIntRange { low, high })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.add(name, ParameterKind::Choice { values })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Validate every dimension and reject duplicate names.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(format!("parameter {} declared twice", param.name));
            }
            param
                .kind
                .validate()
                .map_err(|e| format!("parameter {}: {}", param.name, e))?;
        }
        Ok(())
    }

    /// True when `params` assigns every declared parameter an in-range value
    /// and nothing else.
    pub fn contains(&self, params: &ParamSet) -> bool {
        params.len() == self.parameters.len()
            && self.parameters.iter().all(|def| {
                params
                    .get(&def.name)
                    .map(|value| def.kind.contains(value))
                    .unwrap_or(false)
            })
    }

    fn sample_with<R: Rng>(&self, rng: &mut R) -> ParamSet {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), param.kind.sample(rng)))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<ParamSet>;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &ParamSet, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Which strategy an optimization run uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    Guided { exploration_weight: f64 },
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Random
    }
}

impl StrategyKind {
    pub fn build(&self, space: SearchSpace, seed: u64) -> Box<dyn SearchStrategy> {
        match self {
            Self::Random => Box::new(RandomSearch::new(space, seed)),
            Self::Guided { exploration_weight } => {
                Box::new(GuidedSearch::new(space, *exploration_weight, seed))
            }
        }
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn sample_one(&mut self) -> ParamSet {
        self.space.sample_with(&mut self.rng)
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSet> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Guided search ----

/// Explore/exploit sampling.
///
/// Tracks observed (params, objective) pairs and, with probability
/// `1 - exploration_weight`, perturbs the best-known point instead of
/// sampling fresh. Perturbations are clamped back into bounds.
#[derive(Debug, Clone)]
pub struct GuidedSearch {
    space: SearchSpace,
    observations: Vec<(ParamSet, f64)>,
    exploration_weight: f64,
    rng: ChaCha8Rng,
}

impl GuidedSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, seed: u64) -> Self {
        Self {
            space,
            observations: Vec::new(),
            exploration_weight,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn explore(&mut self) -> ParamSet {
        self.space.sample_with(&mut self.rng)
    }

    /// Best observation so far; earlier observations win ties.
    fn best(&self) -> Option<&ParamSet> {
        let mut best: Option<&(ParamSet, f64)> = None;
        for obs in &self.observations {
            if best.map_or(true, |b| obs.1 > b.1) {
                best = Some(obs);
            }
        }
        best.map(|(params, _)| params)
    }

    fn exploit(&mut self) -> ParamSet {
        let base = match self.best() {
            Some(params) => params.clone(),
            None => return self.explore(),
        };

        let mut perturbed = ParamSet::new();
        for param in &self.space.parameters {
            let value = match (&param.kind, base.get(&param.name)) {
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = self.rng.gen_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v)))
                | (ParameterKind::LogIntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = self.rng.gen_range(-2..=2);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = self.rng.gen_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                // Choices and missing base values fall back to a fresh sample.
                (kind, _) => kind.sample(&mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }
}

impl SearchStrategy for GuidedSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSet> {
        (0..count)
            .map(|_| {
                if self.observations.is_empty()
                    || self.rng.gen::<f64>() < self.exploration_weight
                {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParamSet, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    fn name(&self) -> &str {
        "guided"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("max_depth", 2, 10)
            .add_float("learning_rate", 0.01, 0.5)
            .add_log_uniform("C", 1e-3, 1e2)
            .add_log_int("n_estimators", 10, 200)
            .add_choice("criterion", vec![json!("gini"), json!("entropy")])
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::new(space.clone(), 42);
        let suggestions = rs.suggest(200);
        assert_eq!(suggestions.len(), 200);
        for params in &suggestions {
            assert!(space.contains(params), "out of bounds: {params:?}");
        }
    }

    #[test]
    fn random_search_is_reproducible_per_seed() {
        let a = RandomSearch::new(sample_space(), 7).suggest(5);
        let b = RandomSearch::new(sample_space(), 7).suggest(5);
        let c = RandomSearch::new(sample_space(), 8).suggest(5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn guided_search_exploits_after_reports() {
        let space = SearchSpace::new().add_float("lr", 0.001, 1.0);
        let mut gs = GuidedSearch::new(space.clone(), 0.0, 1);

        let mut best = ParamSet::new();
        best.insert("lr".to_string(), ParameterValue::Float(0.01));
        gs.report(&best, 0.95);

        for params in gs.suggest(20) {
            assert!(space.contains(&params));
            match params.get("lr") {
                // ±10% of the range around the best point, clamped
                Some(ParameterValue::Float(v)) => assert!(*v <= 0.01 + 0.1 * 0.999),
                other => panic!("unexpected lr value: {other:?}"),
            }
        }
    }

    #[test]
    fn guided_search_keeps_first_best_on_ties() {
        let space = SearchSpace::new().add_int("k", 1, 100);
        let mut gs = GuidedSearch::new(space, 0.0, 3);
        let mut first = ParamSet::new();
        first.insert("k".into(), ParameterValue::Int(10));
        let mut second = ParamSet::new();
        second.insert("k".into(), ParameterValue::Int(90));
        gs.report(&first, 0.9);
        gs.report(&second, 0.9);
        assert_eq!(gs.best(), Some(&first));
    }

    #[test]
    fn integer_ranges_at_i64_extremes_sample_in_bounds() {
        let space = SearchSpace::new()
            .add_int("wide", i64::MIN, i64::MAX)
            .add_log_int("log_top", i64::MAX - 1, i64::MAX)
            .add_log_int("log_full", 1, i64::MAX);
        assert!(space.validate().is_ok());
        for params in RandomSearch::new(space.clone(), 11).suggest(64) {
            assert!(space.contains(&params), "out of bounds: {params:?}");
        }

        let mut gs = GuidedSearch::new(space.clone(), 0.0, 5);
        let mut edge = ParamSet::new();
        edge.insert("wide".into(), ParameterValue::Int(i64::MAX));
        edge.insert("log_top".into(), ParameterValue::Int(i64::MAX));
        edge.insert("log_full".into(), ParameterValue::Int(i64::MAX));
        gs.report(&edge, 1.0);
        for params in gs.suggest(64) {
            assert!(space.contains(&params), "out of bounds: {params:?}");
        }
    }

    #[test]
    fn validate_rejects_bad_declarations() {
        assert!(SearchSpace::new().add_int("a", 5, 1).validate().is_err());
        assert!(SearchSpace::new().add_log_uniform("a", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().add_choice("a", vec![]).validate().is_err());
        assert!(SearchSpace::new()
            .add_int("a", 1, 2)
            .add_int("a", 1, 2)
            .validate()
            .is_err());
        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn contains_rejects_extra_or_missing_params() {
        let space = SearchSpace::new().add_int("a", 1, 3);
        let mut params = ParamSet::new();
        assert!(!space.contains(&params));
        params.insert("a".into(), ParameterValue::Int(2));
        assert!(space.contains(&params));
        params.insert("b".into(), ParameterValue::Int(2));
        assert!(!space.contains(&params));
    }

    #[test]
    fn untagged_values_roundtrip_through_json() {
        let value: ParameterValue = serde_json::from_str("3").unwrap();
        assert_eq!(value, ParameterValue::Int(3));
        let value: ParameterValue = serde_json::from_str("0.5").unwrap();
        assert_eq!(value, ParameterValue::Float(0.5));
        let value: ParameterValue = serde_json::from_str("\"gini\"").unwrap();
        assert_eq!(value.as_str(), Some("gini"));
    }

    proptest! {
        #[test]
        fn sampled_values_stay_in_declared_bounds(
            int_low in -50i64..50,
            int_span in 0i64..100,
            float_low in -10.0f64..10.0,
            float_span in 0.0f64..20.0,
            log_low in 1e-6f64..1.0,
            log_factor in 1.0f64..1e4,
            log_int_low in 1i64..20,
            log_int_span in 0i64..500,
            seed in any::<u64>(),
        ) {
            let space = SearchSpace::new()
                .add_int("i", int_low, int_low + int_span)
                .add_float("f", float_low, float_low + float_span)
                .add_log_uniform("l", log_low, log_low * log_factor)
                .add_log_int("li", log_int_low, log_int_low + log_int_span)
                .add_choice("c", vec![json!(1), json!("two"), json!(null)]);
            prop_assert!(space.validate().is_ok());

            let mut random = RandomSearch::new(space.clone(), seed);
            for params in random.suggest(16) {
                prop_assert!(space.contains(&params), "{:?}", params);
            }

            let mut guided = GuidedSearch::new(space.clone(), 0.2, seed);
            let first = guided.suggest(1);
            guided.report(&first[0], 1.0);
            for params in guided.suggest(16) {
                prop_assert!(space.contains(&params), "{:?}", params);
            }
        }
    }
}
