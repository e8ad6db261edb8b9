// Prediction service - validated single predictions against the Production model

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bw_data::{AuditRecord, AuditSink};
use bw_registry::{ExperimentTracker, LoadedModel, ModelRegistry, ProductionLoader, RegistryStore};
use bw_types::{BwError, BwResult, DataError, FeatureContract, RawInput};

use crate::metrics::ServeMetrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: usize,
    pub model_version: String,
}

pub struct PredictionService {
    model: LoadedModel,
    audit: Arc<dyn AuditSink>,
    metrics: ServeMetrics,
}

impl PredictionService {
    /// Repair any interrupted promotion of `name`, then load its Production
    /// version. Either failure is fatal to startup; there is no fallback model.
    pub fn start<S: RegistryStore>(
        registry: Arc<ModelRegistry<S>>,
        tracker: Arc<dyn ExperimentTracker>,
        name: &str,
        audit: Arc<dyn AuditSink>,
    ) -> BwResult<Self> {
        if let Some(repaired) = registry.recover(name)? {
            warn!(
                "Repaired interrupted promotion of {} version {} before loading",
                name, repaired.version
            );
        }
        let model = ProductionLoader::new(registry, tracker).load_production(name)?;
        info!(
            "Serving {} ({} features)",
            model.version_label(),
            model.artifact.feature_names.len()
        );
        Ok(Self::new(model, audit))
    }

    pub fn new(model: LoadedModel, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            model,
            audit,
            metrics: ServeMetrics::new(),
        }
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    pub fn model_version(&self) -> String {
        self.model.version_label()
    }

    pub fn metrics(&self) -> &ServeMetrics {
        &self.metrics
    }

    /// Predict from a raw request body.
    ///
    /// A body that is not JSON is rejected like any other invalid input and
    /// audited with the body text as its payload.
    pub fn predict_body(&self, body: &[u8]) -> BwResult<Prediction> {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(payload) => self.predict(&payload),
            Err(e) => {
                let payload = serde_json::Value::String(String::from_utf8_lossy(body).into_owned());
                let error: BwError = DataError::InvalidInput {
                    message: format!("request body is not valid JSON: {e}"),
                }
                .into();
                self.metrics.record_prediction_error(&error);
                self.reject(&payload, &error)?;
                Err(error)
            }
        }
    }

    /// Validate `payload`, derive the Feature Contract vector and predict.
    ///
    /// Invalid input never reaches the model. Success and failure are both
    /// written to the audit sink; a failed audit write fails the request.
    pub fn predict(&self, payload: &serde_json::Value) -> BwResult<Prediction> {
        let result = self.try_predict(payload);
        match &result {
            Ok(prediction) => self.metrics.record_prediction(prediction.prediction),
            Err(error) => self.metrics.record_prediction_error(error),
        }
        result
    }

    fn try_predict(&self, payload: &serde_json::Value) -> BwResult<Prediction> {
        debug!("Received raw input: {}", payload);
        let input = match RawInput::from_json(payload) {
            Ok(input) => input,
            Err(e) => {
                let error = BwError::from(e);
                self.reject(payload, &error)?;
                return Err(error);
            }
        };

        let features = match FeatureContract::derive_checked(&input) {
            Ok(features) => features,
            Err(e) => {
                let error = BwError::from(e);
                self.reject(payload, &error)?;
                return Err(error);
            }
        };
        let label = match self.model.artifact.predict_one(&features) {
            Ok(label) => label,
            Err(e) => {
                let error = BwError::from(e);
                self.reject(payload, &error)?;
                return Err(error);
            }
        };

        let version = self.model_version();
        self.audit
            .append(AuditRecord::prediction(&input, label, version.clone()))?;
        debug!("Prediction output: {}", label);
        Ok(Prediction {
            prediction: label,
            model_version: version,
        })
    }

    fn reject(&self, payload: &serde_json::Value, error: &BwError) -> BwResult<()> {
        warn!("Prediction rejected: {}", error);
        self.audit.append(AuditRecord::failure(
            payload,
            error.to_string(),
            Some(self.model_version()),
        ))
    }
}
