//! Typed access to a sampled parameter set.

use bw_optimizer::{ParamSet, ParameterValue};
use bw_types::ModelError;

pub(crate) struct ParamReader<'a> {
    params: &'a ParamSet,
}

impl<'a> ParamReader<'a> {
    /// Rejects any parameter name the family does not understand.
    pub(crate) fn new(
        family: &str,
        params: &'a ParamSet,
        known: &[&str],
    ) -> Result<Self, ModelError> {
        if let Some(unknown) = params.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(ModelError::UnknownParameter {
                family: family.to_string(),
                parameter: unknown.clone(),
            });
        }
        Ok(Self { params })
    }

    /// Fails when `name` was not supplied at all. An explicit `null` counts
    /// as supplied.
    pub(crate) fn require(&self, name: &str) -> Result<(), ModelError> {
        if self.params.contains_key(name) {
            Ok(())
        } else {
            Err(Self::invalid(name, "required parameter missing"))
        }
    }

    /// Value for `name`, treating an explicit `null` as absent.
    fn value(&self, name: &str) -> Option<&'a ParameterValue> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    fn invalid(name: &str, message: impl Into<String>) -> ModelError {
        ModelError::InvalidParameter {
            parameter: name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn positive_f64(&self, name: &str, default: Option<f64>) -> Result<f64, ModelError> {
        let value = match self.value(name) {
            Some(v) => v
                .as_f64()
                .ok_or_else(|| Self::invalid(name, format!("expected a number, got {v}")))?,
            None => default.ok_or_else(|| Self::invalid(name, "required parameter missing"))?,
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(Self::invalid(name, format!("must be > 0, got {value}")));
        }
        Ok(value)
    }

    pub(crate) fn usize_at_least(
        &self,
        name: &str,
        default: Option<usize>,
        min: usize,
    ) -> Result<usize, ModelError> {
        let value = match self.value(name) {
            Some(v) => {
                let raw = v
                    .as_i64()
                    .ok_or_else(|| Self::invalid(name, format!("expected an integer, got {v}")))?;
                usize::try_from(raw)
                    .map_err(|_| Self::invalid(name, format!("must be >= {min}, got {raw}")))?
            }
            None => default.ok_or_else(|| Self::invalid(name, "required parameter missing"))?,
        };
        if value < min {
            return Err(Self::invalid(name, format!("must be >= {min}, got {value}")));
        }
        Ok(value)
    }

    /// Like [`Self::usize_at_least`], but an absent or `null` value means "no limit".
    pub(crate) fn optional_usize(&self, name: &str, min: usize) -> Result<Option<usize>, ModelError> {
        match self.value(name) {
            Some(_) => self.usize_at_least(name, None, min).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn choice(
        &self,
        name: &str,
        default: &'static str,
        allowed: &[&'static str],
    ) -> Result<&'static str, ModelError> {
        let raw = match self.value(name) {
            Some(v) => v
                .as_str()
                .ok_or_else(|| Self::invalid(name, format!("expected a string, got {v}")))?,
            None => default,
        };
        allowed
            .iter()
            .copied()
            .find(|a| *a == raw)
            .ok_or_else(|| Self::invalid(name, format!("unsupported value {raw:?}, expected one of {allowed:?}")))
    }

    pub(crate) fn bool(&self, name: &str, default: bool) -> Result<bool, ModelError> {
        match self.value(name) {
            Some(v) => v
                .as_bool()
                .ok_or_else(|| Self::invalid(name, format!("expected a boolean, got {v}"))),
            None => Ok(default),
        }
    }

    pub(crate) fn u64_or(&self, name: &str, default: u64) -> Result<u64, ModelError> {
        match self.value(name) {
            Some(v) => v
                .as_i64()
                .and_then(|raw| u64::try_from(raw).ok())
                .ok_or_else(|| Self::invalid(name, format!("expected a non-negative integer, got {v}"))),
            None => Ok(default),
        }
    }
}
