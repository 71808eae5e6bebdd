//! Shared type-level errors

use thiserror::Error;

/// Errors produced while parsing wire values into typed vocabulary
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("Unknown {enum_name} value: {value}")]
    UnknownEnumValue {
        enum_name: &'static str,
        value: String,
    },

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, TypeError>;
