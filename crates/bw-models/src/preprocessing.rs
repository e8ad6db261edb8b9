//! Feature standardization.

use serde::{Deserialize, Serialize};

use bw_types::{FeatureMatrix, ModelError};

/// Zero-mean, unit-variance scaling fitted on training rows.
///
/// A constant column has no spread to divide by; it is only centred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &FeatureMatrix) -> Result<Self, ModelError> {
        let n = x.n_rows();
        if n == 0 {
            return Err(ModelError::TrainingFailed {
                message: "cannot fit a scaler on zero rows".to_string(),
            });
        }
        let d = x.n_features();
        let mut mean = vec![0.0; d];
        for row in x.rows() {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        let mut scale = vec![0.0; d];
        for row in x.rows() {
            for ((s, v), m) in scale.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut scale {
            let std = (*s / n as f64).sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &mut [f64]) -> Result<(), ModelError> {
        if row.len() != self.mean.len() {
            return Err(ModelError::ShapeMismatch {
                expected: self.mean.len(),
                actual: row.len(),
            });
        }
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            *v = (*v - m) / s;
        }
        Ok(())
    }

    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix, ModelError> {
        if x.n_features() != self.mean.len() {
            return Err(ModelError::ShapeMismatch {
                expected: self.mean.len(),
                actual: x.n_features(),
            });
        }
        let mut scaled = x.clone();
        for row in scaled.rows_mut() {
            self.transform_row(row)?;
        }
        Ok(scaled)
    }
}
