use crate::types::{InstrumentClass, SourceId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceError {
    #[error("{field} must not be negative, got {value}")]
    NegativeValue { field: &'static str, value: Decimal },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Invalid instrument key: {0}")]
    InvalidInstrument(String),

    #[error("Invalid instrument class: {0}")]
    InvalidClass(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("Source already registered: {0}")]
    DuplicateSource(SourceId),

    #[error("Source {source_id} belongs to {actual}, not {expected}")]
    ClassMismatch {
        source_id: SourceId,
        expected: InstrumentClass,
        actual: InstrumentClass,
    },

    #[error("Invalid ordering for {class}: {reason}")]
    InvalidOrdering {
        class: InstrumentClass,
        reason: String,
    },

    #[error("No price data available for {0}")]
    NoPriceData(String),

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
}

impl PriceError {
    /// Validation errors are caller mistakes caught at a calculator or
    /// ingestion boundary.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PriceError::NegativeValue { .. }
                | PriceError::InvalidCurrency(_)
                | PriceError::InvalidInstrument(_)
                | PriceError::InvalidClass(_)
                | PriceError::InvalidValue(_)
                | PriceError::MalformedBody(_)
        )
    }

    /// Configuration errors are rejected before any registry mutation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PriceError::UnknownSource(_)
                | PriceError::DuplicateSource(_)
                | PriceError::ClassMismatch { .. }
                | PriceError::InvalidOrdering { .. }
        )
    }
}

/// Rejects a negative decimal input with a descriptive error.
pub fn ensure_non_negative(field: &'static str, value: Decimal) -> Result<Decimal> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PriceError::NegativeValue { field, value });
    }
    Ok(value)
}

pub type Result<T> = std::result::Result<T, PriceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_negative_values_are_rejected() {
        let err = ensure_non_negative("weight", dec!(-0.5)).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "weight must not be negative, got -0.5");
    }

    #[test]
    fn test_zero_and_negative_zero_pass() {
        assert_eq!(ensure_non_negative("rate", dec!(0)).unwrap(), dec!(0));
        assert!(ensure_non_negative("rate", -dec!(0)).is_ok());
    }

    #[test]
    fn test_error_kinds() {
        assert!(PriceError::DuplicateSource(SourceId::from("a")).is_configuration());
        assert!(!PriceError::NoPriceData("gold:k21".into()).is_configuration());
        assert!(!PriceError::Overflow("x".into()).is_validation());
    }
}
