//! Secret values that cannot leak through Debug/Display

use std::fmt;

use crate::{CommonError, CommonResult};

/// A secret string. Prints as `[REDACTED]` in all formatting contexts;
/// the value is only reachable through [`Secret::expose`].
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the secret value. Callers must never pass the result to a
    /// logging or serialization path.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Read a secret from the environment. Absence is a config error; secrets
/// never get defaults.
pub fn secret_from_env(name: &str) -> CommonResult<Secret> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
        _ => Err(CommonError::Config(format!(
            "required secret variable {} is not set",
            name
        ))),
    }
}
