//! Error types for the stock recall families

use tactus_core::RecallError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, FxError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FxError {
    #[error("Unknown LFO shape: {0}")]
    UnknownShape(String),

    #[error("Invalid {name}: {value} (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
}

impl From<FxError> for RecallError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::UnknownShape(shape) => RecallError::InvalidParameter("shape".into(), shape),
            FxError::OutOfRange { name, value, .. } => {
                RecallError::InvalidParameter(name.to_string(), value.to_string())
            }
        }
    }
}

/// Reject non-finite or out-of-range parameter values.
pub(crate) fn check_range(name: &'static str, value: f64, min: f64, max: f64, expected: &'static str) -> Result<f64> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(FxError::OutOfRange { name, value, expected })
    }
}
