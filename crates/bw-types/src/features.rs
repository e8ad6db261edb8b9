//! Feature contract shared by training and serving.
//!
//! Four raw measurements go in; an ordered 7-column vector comes out. The
//! column order is part of the contract: models are trained against it and
//! the serving path assembles prediction rows in the same order.

use serde::{Deserialize, Serialize};

use crate::errors::DataError;

/// Raw input fields, in the order they appear in the source dataset.
pub const RAW_COLUMNS: [&str; 4] = ["sepal_length", "sepal_width", "petal_length", "petal_width"];

/// Derived feature columns, in model order.
pub const FEATURE_COLUMNS: [&str; 7] = [
    "sepal_length",
    "sepal_width",
    "petal_length",
    "petal_width",
    "Petal_ratio",
    "Sepal_area",
    "Petal_area",
];

pub const FEATURE_COUNT: usize = FEATURE_COLUMNS.len();

/// The four raw numeric fields accepted at the serving boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawInput {
    pub sepal_length: f64,
    pub sepal_width: f64,
    pub petal_length: f64,
    pub petal_width: f64,
}

impl RawInput {
    pub fn new(sepal_length: f64, sepal_width: f64, petal_length: f64, petal_width: f64) -> Self {
        Self {
            sepal_length,
            sepal_width,
            petal_length,
            petal_width,
        }
    }

    /// Validate an untyped payload. Every raw field must be present and a
    /// finite number; anything else is rejected before it reaches a model.
    pub fn from_json(payload: &serde_json::Value) -> Result<Self, DataError> {
        let object = payload.as_object().ok_or_else(|| DataError::InvalidInput {
            message: "payload must be a JSON object".to_string(),
        })?;

        let field = |name: &str| -> Result<f64, DataError> {
            let value = object.get(name).ok_or_else(|| DataError::InvalidInput {
                message: format!("missing required field: {name}"),
            })?;
            let number = value.as_f64().ok_or_else(|| DataError::InvalidInput {
                message: format!("field {name} must be a number, got {value}"),
            })?;
            if !number.is_finite() {
                return Err(DataError::InvalidInput {
                    message: format!("field {name} must be finite"),
                });
            }
            Ok(number)
        };

        Ok(Self {
            sepal_length: field("sepal_length")?,
            sepal_width: field("sepal_width")?,
            petal_length: field("petal_length")?,
            petal_width: field("petal_width")?,
        })
    }
}

/// Ordered feature vector produced by [`FeatureContract::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn petal_ratio(&self) -> f64 {
        self.0[4]
    }

    pub fn sepal_area(&self) -> f64 {
        self.0[5]
    }

    pub fn petal_area(&self) -> f64 {
        self.0[6]
    }

    /// Reject vectors with an infinite or NaN column. Finite raw values can
    /// still overflow the engineered products.
    pub fn ensure_finite(&self) -> Result<(), DataError> {
        match self.0.iter().position(|v| !v.is_finite()) {
            Some(i) => Err(DataError::InvalidInput {
                message: format!("derived feature {} is not finite", FEATURE_COLUMNS[i]),
            }),
            None => Ok(()),
        }
    }
}

/// Deterministic raw → feature transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureContract;

impl FeatureContract {
    pub fn columns() -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }

    pub fn derive(input: &RawInput) -> FeatureVector {
        // A zero petal width yields a ratio of 0 rather than a division error.
        let petal_ratio = if input.petal_width != 0.0 {
            input.petal_length / input.petal_width
        } else {
            0.0
        };

        FeatureVector([
            input.sepal_length,
            input.sepal_width,
            input.petal_length,
            input.petal_width,
            petal_ratio,
            input.sepal_length * input.sepal_width,
            input.petal_length * input.petal_width,
        ])
    }

    /// [`derive`](Self::derive) for untrusted input: the vector must be
    /// finite in every column.
    pub fn derive_checked(input: &RawInput) -> Result<FeatureVector, DataError> {
        let vector = Self::derive(input);
        vector.ensure_finite()?;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn derives_engineered_columns_in_order() {
        let vector = FeatureContract::derive(&RawInput::new(5.1, 3.5, 1.4, 0.2));
        let expected = [5.1, 3.5, 1.4, 0.2, 7.0, 17.85, 0.28];
        for (actual, expected) in vector.as_slice().iter().zip(expected) {
            assert_close(*actual, expected);
        }
    }

    #[test]
    fn zero_petal_width_yields_zero_ratio() {
        let vector = FeatureContract::derive(&RawInput::new(5.0, 3.0, 1.2, 0.0));
        assert_eq!(vector.petal_ratio(), 0.0);
        assert_eq!(vector.petal_area(), 0.0);
        assert_close(vector.sepal_area(), 15.0);
    }

    #[test]
    fn overflowing_products_are_rejected() {
        let huge = RawInput::new(1e200, 1e200, 1e200, 1e200);
        assert!(FeatureContract::derive(&huge).sepal_area().is_infinite());
        let err = FeatureContract::derive_checked(&huge).unwrap_err();
        assert!(err.to_string().contains("Sepal_area"), "{err}");

        let tiny_width = RawInput::new(5.0, 3.0, 1e300, 1e-300);
        let err = FeatureContract::derive_checked(&tiny_width).unwrap_err();
        assert!(err.to_string().contains("Petal_ratio"), "{err}");

        assert!(FeatureContract::derive_checked(&RawInput::new(5.1, 3.5, 1.4, 0.2)).is_ok());
    }

    #[test]
    fn payload_validation_rejects_missing_and_malformed_fields() {
        let missing = json!({"sepal_length": 5.1, "sepal_width": 3.5, "petal_length": 1.4});
        let err = RawInput::from_json(&missing).unwrap_err();
        assert!(err.to_string().contains("petal_width"));

        let malformed = json!({
            "sepal_length": "wide",
            "sepal_width": 3.5,
            "petal_length": 1.4,
            "petal_width": 0.2
        });
        assert!(RawInput::from_json(&malformed).is_err());
        assert!(RawInput::from_json(&json!([1, 2, 3, 4])).is_err());
    }

    #[test]
    fn payload_validation_accepts_integers() {
        let payload = json!({"sepal_length": 5, "sepal_width": 3, "petal_length": 1, "petal_width": 1});
        let input = RawInput::from_json(&payload).unwrap();
        assert_eq!(input, RawInput::new(5.0, 3.0, 1.0, 1.0));
    }
}
