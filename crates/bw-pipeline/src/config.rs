//! Pipeline configuration.
//!
//! The TOML document is deserialized into permissive `Raw*` structs and then
//! validated into a [`PipelineConfig`]. Every problem found here is a
//! configuration error and stops the run before any data is read.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use bw_models::{Metric, ModelFamily};
use bw_optimizer::{ParameterKind, SearchSpace, StrategyKind};
use bw_types::{config_error, BwResult};

use crate::selector::TieBreak;

#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub raw: Option<PathBuf>,
    pub processed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub target_column: String,
    pub test_size: f64,
    pub validation_size: f64,
    pub random_state: u64,
    pub registry_name: String,
    pub standardize: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSettings {
    pub name: String,
    pub tracking_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub n_trials: usize,
    pub strategy: StrategyKind,
    /// Metric scored on the validation split for each trial.
    pub metric: Metric,
    pub concurrency: usize,
    pub trial_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSettings {
    pub primary_metric: Metric,
    pub tie_break: TieBreak,
    pub candidate_timeout: Option<Duration>,
}

/// One candidate family with its search space, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyConfig {
    /// Key under `[models]`; also the tracked run name.
    pub name: String,
    pub family: ModelFamily,
    pub search_space: SearchSpace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub model: ModelSettings,
    pub experiment: ExperimentSettings,
    pub registry_root: PathBuf,
    pub optimizer: OptimizerSettings,
    pub selection: SelectionSettings,
    pub families: Vec<FamilyConfig>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> BwResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read config {}: {}", path.display(), e))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> BwResult<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| config_error!("malformed configuration: {}", e))?;
        raw.validate()
    }

    /// Processed dataset path; training cannot run without one.
    pub fn processed_data(&self) -> BwResult<&Path> {
        self.data
            .processed
            .as_deref()
            .ok_or_else(|| config_error!("missing required key data.processed"))
    }
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    data: RawData,
    model: Option<RawModel>,
    experiment: Option<RawExperiment>,
    #[serde(default)]
    registry: RawRegistry,
    #[serde(default)]
    optimizer: RawOptimizer,
    #[serde(default)]
    selection: RawSelection,
    /// Kept as a table so declaration order survives.
    #[serde(default)]
    models: toml::Table,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
    raw: Option<PathBuf>,
    processed: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    target_column: Option<String>,
    test_size: Option<f64>,
    #[serde(default = "default_validation_size")]
    validation_size: f64,
    random_state: Option<u64>,
    #[serde(default = "default_registry_name")]
    registry_name: String,
    #[serde(default = "default_true")]
    standardize: bool,
}

#[derive(Debug, Deserialize)]
struct RawExperiment {
    name: Option<String>,
    #[serde(default = "default_tracking_root")]
    tracking_root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    #[serde(default = "default_registry_root")]
    root: PathBuf,
}

impl Default for RawRegistry {
    fn default() -> Self {
        Self {
            root: default_registry_root(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawOptimizer {
    n_trials: i64,
    strategy: String,
    metric: Metric,
    concurrency: i64,
    trial_timeout_secs: u64,
    exploration_weight: f64,
}

impl Default for RawOptimizer {
    fn default() -> Self {
        Self {
            n_trials: 20,
            strategy: "random".to_string(),
            metric: Metric::F1Macro,
            concurrency: 4,
            trial_timeout_secs: 30,
            exploration_weight: 0.3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSelection {
    primary_metric: Metric,
    tie_break: TieBreak,
    candidate_timeout_secs: u64,
}

impl Default for RawSelection {
    fn default() -> Self {
        Self {
            primary_metric: Metric::F1Macro,
            tie_break: TieBreak::InferenceTime,
            candidate_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFamily {
    class: String,
    #[serde(default)]
    optuna_search_space: toml::Table,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(rename = "type")]
    kind: String,
    low: Option<toml::Value>,
    high: Option<toml::Value>,
    #[serde(default)]
    log: bool,
    choices: Option<Vec<toml::Value>>,
}

fn default_validation_size() -> f64 {
    0.25
}

fn default_registry_name() -> String {
    "iris_best_model".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tracking_root() -> PathBuf {
    PathBuf::from("mlruns")
}

fn default_registry_root() -> PathBuf {
    PathBuf::from("registry")
}

/// Zero disables the limit.
fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn fraction(key: &str, value: f64) -> BwResult<f64> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(config_error!("{} must be strictly between 0 and 1, got {}", key, value))
    }
}

impl RawConfig {
    fn validate(self) -> BwResult<PipelineConfig> {
        let model = self
            .model
            .ok_or_else(|| config_error!("missing required section [model]"))?;
        let target_column = model
            .target_column
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| config_error!("missing required key model.target_column"))?;
        let test_size = fraction(
            "model.test_size",
            model
                .test_size
                .ok_or_else(|| config_error!("missing required key model.test_size"))?,
        )?;
        let validation_size = fraction("model.validation_size", model.validation_size)?;
        let random_state = model
            .random_state
            .ok_or_else(|| config_error!("missing required key model.random_state"))?;
        if model.registry_name.trim().is_empty() {
            return Err(config_error!("model.registry_name must not be empty"));
        }

        let experiment = self
            .experiment
            .ok_or_else(|| config_error!("missing required section [experiment]"))?;
        let experiment_name = experiment
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| config_error!("missing required key experiment.name"))?;

        let optimizer = self.optimizer.validate()?;
        let selection = SelectionSettings {
            primary_metric: self.selection.primary_metric,
            tie_break: self.selection.tie_break,
            candidate_timeout: timeout(self.selection.candidate_timeout_secs),
        };

        if self.models.is_empty() {
            return Err(config_error!("no candidate families declared under [models]"));
        }
        let families = self
            .models
            .into_iter()
            .map(|(name, value)| family_config(name, value))
            .collect::<BwResult<Vec<_>>>()?;

        Ok(PipelineConfig {
            data: DataConfig {
                raw: self.data.raw,
                processed: self.data.processed,
            },
            model: ModelSettings {
                target_column,
                test_size,
                validation_size,
                random_state,
                registry_name: model.registry_name,
                standardize: model.standardize,
            },
            experiment: ExperimentSettings {
                name: experiment_name,
                tracking_root: experiment.tracking_root,
            },
            registry_root: self.registry.root,
            optimizer,
            selection,
            families,
        })
    }
}

impl RawOptimizer {
    fn validate(self) -> BwResult<OptimizerSettings> {
        if self.n_trials <= 0 {
            return Err(config_error!("optimizer.n_trials must be positive, got {}", self.n_trials));
        }
        if self.concurrency <= 0 {
            return Err(config_error!(
                "optimizer.concurrency must be positive, got {}",
                self.concurrency
            ));
        }
        let strategy = match self.strategy.as_str() {
            "random" => StrategyKind::Random,
            "guided" => {
                if !(0.0..=1.0).contains(&self.exploration_weight) {
                    return Err(config_error!(
                        "optimizer.exploration_weight must be within [0, 1], got {}",
                        self.exploration_weight
                    ));
                }
                StrategyKind::Guided {
                    exploration_weight: self.exploration_weight,
                }
            }
            other => {
                return Err(config_error!(
                    "unknown optimizer.strategy {:?}, expected \"random\" or \"guided\"",
                    other
                ))
            }
        };
        Ok(OptimizerSettings {
            n_trials: self.n_trials as usize,
            strategy,
            metric: self.metric,
            concurrency: self.concurrency as usize,
            trial_timeout: timeout(self.trial_timeout_secs),
        })
    }
}

fn family_config(name: String, value: toml::Value) -> BwResult<FamilyConfig> {
    let raw = value
        .try_into::<RawFamily>()
        .map_err(|e| config_error!("models.{}: {}", name, e))?;
    let family = ModelFamily::from_reference(&raw.class)
        .map_err(|e| config_error!("models.{}: {}", name, e))?;

    let mut space = SearchSpace::new();
    for (param, value) in raw.optuna_search_space {
        let known = family.known_params();
        if !known.contains(&param.as_str()) {
            return Err(config_error!(
                "models.{}: {} does not accept parameter {:?} (known: {})",
                name,
                family,
                param,
                known.join(", ")
            ));
        }
        let kind = parameter_kind(&name, &param, value)?;
        space = space.add(param, kind);
    }

    space
        .validate()
        .map_err(|e| config_error!("models.{}: {}", name, e))?;
    for required in family.required_params() {
        if space.get(required).is_none() {
            return Err(config_error!(
                "models.{}: search space must declare {:?} for {}",
                name,
                required,
                family
            ));
        }
    }

    Ok(FamilyConfig {
        name,
        family,
        search_space: space,
    })
}

fn parameter_kind(family: &str, param: &str, value: toml::Value) -> BwResult<ParameterKind> {
    let raw = value
        .try_into::<RawParam>()
        .map_err(|e| config_error!("models.{}.{}: {}", family, param, e))?;
    let bound = |v: &Option<toml::Value>, which: &str| -> BwResult<toml::Value> {
        v.clone()
            .ok_or_else(|| config_error!("models.{}.{}: missing {}", family, param, which))
    };

    let kind = match raw.kind.as_str() {
        "int" => {
            let as_int = |v: toml::Value, which: &str| {
                v.as_integer()
                    .ok_or_else(|| config_error!("models.{}.{}: {} must be an integer", family, param, which))
            };
            let low = as_int(bound(&raw.low, "low")?, "low")?;
            let high = as_int(bound(&raw.high, "high")?, "high")?;
            if raw.log {
                ParameterKind::LogIntRange { low, high }
            } else {
                ParameterKind::IntRange { low, high }
            }
        }
        "float" => {
            let as_float = |v: toml::Value, which: &str| match v {
                toml::Value::Float(f) => Ok(f),
                toml::Value::Integer(i) => Ok(i as f64),
                _ => Err(config_error!("models.{}.{}: {} must be a number", family, param, which)),
            };
            let low = as_float(bound(&raw.low, "low")?, "low")?;
            let high = as_float(bound(&raw.high, "high")?, "high")?;
            if raw.log {
                ParameterKind::LogUniform { low, high }
            } else {
                ParameterKind::FloatRange { low, high }
            }
        }
        "categorical" => {
            let choices = raw
                .choices
                .ok_or_else(|| config_error!("models.{}.{}: missing choices", family, param))?;
            let values = choices
                .into_iter()
                .map(choice_value)
                .collect::<BwResult<Vec<_>>>()?;
            ParameterKind::Choice { values }
        }
        other => {
            return Err(config_error!(
                "models.{}.{}: unknown parameter type {:?}",
                family,
                param,
                other
            ))
        }
    };
    Ok(kind)
}

/// TOML has no null, so the strings `"None"` and `"null"` stand for "no
/// value" (e.g. an unlimited `max_depth`).
fn choice_value(value: toml::Value) -> BwResult<serde_json::Value> {
    match &value {
        toml::Value::String(s) if s == "None" || s == "null" => Ok(serde_json::Value::Null),
        _ => serde_json::to_value(&value).map_err(Into::into),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bw_types::BwError;

    pub(crate) const SAMPLE: &str = r#"
[data]
processed = "data/processed/iris_processed.csv"

[model]
target_column = "target"
test_size = 0.2
random_state = 42

[experiment]
name = "iris_classification"

[optimizer]
n_trials = 6
concurrency = 2

[models.svc]
class = "sklearn.svm.SVC"
[models.svc.optuna_search_space]
C = { type = "float", low = 0.01, high = 10.0, log = true }
kernel = { type = "categorical", choices = ["linear"] }

[models.decision_tree]
class = "decision_tree"
[models.decision_tree.optuna_search_space]
max_depth = { type = "categorical", choices = ["None", 2, 4] }
criterion = { type = "categorical", choices = ["gini", "entropy"] }
min_samples_split = { type = "int", low = 2, high = 6 }
"#;

    fn assert_config_error(text: &str) {
        match PipelineConfig::from_toml_str(text) {
            Err(BwError::Config(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn parses_sample_with_defaults() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.model.target_column, "target");
        assert_eq!(config.model.validation_size, 0.25);
        assert_eq!(config.model.registry_name, "iris_best_model");
        assert!(config.model.standardize);
        assert_eq!(config.optimizer.n_trials, 6);
        assert_eq!(config.optimizer.metric, Metric::F1Macro);
        assert_eq!(config.optimizer.trial_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.selection.tie_break, TieBreak::InferenceTime);
        assert_eq!(config.registry_root, PathBuf::from("registry"));
        assert_eq!(config.experiment.tracking_root, PathBuf::from("mlruns"));
    }

    #[test]
    fn families_keep_declaration_order() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let names: Vec<&str> = config.families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["svc", "decision_tree"]);
        assert_eq!(config.families[0].family, ModelFamily::Svc);

        let depth = config.families[1].search_space.get("max_depth").unwrap();
        assert_eq!(
            depth.kind,
            ParameterKind::Choice {
                values: vec![
                    serde_json::Value::Null,
                    serde_json::json!(2),
                    serde_json::json!(4)
                ]
            }
        );
    }

    #[test]
    fn unknown_family_is_rejected() {
        assert_config_error(&SAMPLE.replace("sklearn.svm.SVC", "sklearn.svm.NuSVC"));
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let text = SAMPLE.replace(
            "C = { type = \"float\", low = 0.01, high = 10.0, log = true }\n",
            "",
        );
        assert_config_error(&text);
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let text = SAMPLE.replace(
            "kernel = { type = \"categorical\", choices = [\"linear\"] }",
            "gamma = { type = \"float\", low = 0.1, high = 1.0 }",
        );
        assert_config_error(&text);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert_config_error(&SAMPLE.replace("test_size = 0.2", "test_size = 1.5"));
        assert_config_error(&SAMPLE.replace("n_trials = 6", "n_trials = 0"));
        assert_config_error(&SAMPLE.replace("target_column = \"target\"\n", ""));
        assert_config_error(&SAMPLE.replace("[optimizer]", "[optimizer]\nmetric = \"roc_auc\""));
        assert_config_error(&SAMPLE.replace("low = 2, high = 6", "low = 6, high = 2"));
        assert_config_error(&SAMPLE.replace("type = \"int\"", "type = \"uniform\""));
    }

    #[test]
    fn shipped_config_is_valid() {
        let config =
            PipelineConfig::from_toml_str(include_str!("../../../config/model_config.toml")).unwrap();
        let families: Vec<ModelFamily> = config.families.iter().map(|f| f.family).collect();
        assert_eq!(
            families,
            vec![
                ModelFamily::LogisticRegression,
                ModelFamily::RandomForest,
                ModelFamily::DecisionTree,
                ModelFamily::Svc
            ]
        );
        assert_eq!(config.optimizer.n_trials, 20);
    }

    #[test]
    fn guided_strategy_and_disabled_timeouts() {
        let text = SAMPLE.replace(
            "[optimizer]",
            "[optimizer]\nstrategy = \"guided\"\nexploration_weight = 0.5\ntrial_timeout_secs = 0",
        );
        let config = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(
            config.optimizer.strategy,
            StrategyKind::Guided {
                exploration_weight: 0.5
            }
        );
        assert_eq!(config.optimizer.trial_timeout, None);
    }
}
