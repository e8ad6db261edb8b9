//! Serializable trained model plus everything serving needs to use it.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bw_optimizer::ParamSet;
use bw_types::{FeatureMatrix, FeatureVector, ModelError};

use crate::family::{Classifier, Model, ModelFamily};
use crate::preprocessing::StandardScaler;

/// A fitted model with its preprocessing.
///
/// The scaler (when present) was fitted on the same rows as the model and
/// is applied to every prediction input, so training and serving see the
/// same transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub family: ModelFamily,
    pub parameters: ParamSet,
    pub feature_names: Vec<String>,
    pub scaler: Option<StandardScaler>,
    pub model: Model,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Fit `family` with `parameters` on `x`/`y`, standardizing first when
    /// `standardize` is set.
    pub fn train(
        family: ModelFamily,
        parameters: &ParamSet,
        feature_names: &[String],
        x: &FeatureMatrix,
        y: &[usize],
        standardize: bool,
    ) -> Result<Self, ModelError> {
        debug!(
            "Fitting {} on {} rows ({} features, standardize={})",
            family.key(),
            x.n_rows(),
            x.n_features(),
            standardize
        );
        let started = Instant::now();
        let mut model = family.build(parameters)?;
        let scaler = if standardize {
            Some(StandardScaler::fit(x)?)
        } else {
            None
        };
        match &scaler {
            Some(scaler) => model.fit(&scaler.transform(x)?, y)?,
            None => model.fit(x, y)?,
        }
        debug!("Fitted {} in {:?}", family.key(), started.elapsed());

        Ok(Self {
            family,
            parameters: parameters.clone(),
            feature_names: feature_names.to_vec(),
            scaler,
            model,
            trained_at: Utc::now(),
        })
    }

    /// Batched prediction over unscaled rows.
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        if x.n_features() != self.feature_names.len() {
            return Err(ModelError::ShapeMismatch {
                expected: self.feature_names.len(),
                actual: x.n_features(),
            });
        }
        match &self.scaler {
            Some(scaler) => self.model.predict(&scaler.transform(x)?),
            None => self.model.predict(x),
        }
    }

    /// Predict the class of one Feature Contract vector.
    pub fn predict_one(&self, features: &FeatureVector) -> Result<usize, ModelError> {
        let mut x = FeatureMatrix::new(features.as_slice().len());
        x.push_row(features.as_slice())?;
        self.predict(&x)?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::TrainingFailed {
                message: "model returned no prediction".to_string(),
            })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
