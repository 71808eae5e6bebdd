//! Repositories, one per domain, each implementing its owning crate's
//! storage trait

pub mod actions;
pub mod events;
pub mod incidents;
pub mod rbac;

pub use actions::*;
pub use events::*;
pub use incidents::*;
pub use rbac::*;

use serde_json::Value;

/// Parse a SCREAMING_SNAKE_CASE column back into a serde enum
pub(crate) fn enum_from_text<T: serde::de::DeserializeOwned>(
    text: &str,
) -> Result<T, crate::DbError> {
    serde_json::from_value(Value::String(text.to_string()))
        .map_err(|e| crate::DbError::Serialization(format!("bad enum value {}: {}", text, e)))
}

/// Serialize a serde enum into its SCREAMING_SNAKE_CASE column text
pub(crate) fn enum_to_text<T: serde::Serialize>(value: &T) -> Result<String, crate::DbError> {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => Ok(s),
        Ok(other) => Err(crate::DbError::Serialization(format!(
            "enum did not serialize to a string: {}",
            other
        ))),
        Err(e) => Err(crate::DbError::Serialization(e.to_string())),
    }
}
