//! Typed configuration loading
//!
//! Every required variable fails startup when absent. Values are read once
//! into a typed map; security-sensitive values go through the secret
//! accessor and never appear in the redacted dump.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{redacted_config, CommonError, CommonResult, Secret};

/// Builder-style environment configuration loader
pub struct ConfigLoader {
    component: String,
    required: Vec<(String, String)>,
    optional: Vec<(String, String, Option<String>)>,
}

/// Loaded configuration with typed accessors
#[derive(Debug, Clone)]
pub struct Config {
    component: String,
    values: BTreeMap<String, String>,
}

impl ConfigLoader {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    /// Declare a required variable; startup fails if it is absent
    pub fn require(mut self, name: &str, description: &str) -> Self {
        self.required.push((name.to_string(), description.to_string()));
        self
    }

    /// Declare an optional variable with an optional default
    pub fn optional(mut self, name: &str, description: &str, default: Option<&str>) -> Self {
        self.optional.push((
            name.to_string(),
            description.to_string(),
            default.map(str::to_string),
        ));
        self
    }

    /// Read the environment. All missing required variables are reported
    /// together so operators fix the unit file once.
    pub fn load(self) -> CommonResult<Config> {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();

        for (name, description) in &self.required {
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => {
                    values.insert(name.clone(), value);
                }
                _ => missing.push(format!("{} ({})", name, description)),
            }
        }

        for (name, _description, default) in &self.optional {
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => {
                    values.insert(name.clone(), value);
                }
                _ => {
                    if let Some(default) = default {
                        values.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        if !missing.is_empty() {
            return Err(CommonError::Config(format!(
                "{}: missing required variables: {}",
                self.component,
                missing.join(", ")
            )));
        }

        Ok(Config {
            component: self.component,
            values,
        })
    }
}

impl Config {
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_required(&self, name: &str) -> CommonResult<&str> {
        self.get(name)
            .ok_or_else(|| CommonError::Config(format!("variable {} was not declared", name)))
    }

    pub fn get_port(&self, name: &str) -> CommonResult<u16> {
        let raw = self.get_required(name)?;
        raw.parse::<u16>()
            .map_err(|_| CommonError::Config(format!("{} is not a valid port: {}", name, raw)))
    }

    pub fn get_u64(&self, name: &str) -> CommonResult<u64> {
        let raw = self.get_required(name)?;
        raw.parse::<u64>()
            .map_err(|_| CommonError::Config(format!("{} is not an integer: {}", name, raw)))
    }

    pub fn get_path(&self, name: &str) -> CommonResult<PathBuf> {
        Ok(PathBuf::from(self.get_required(name)?))
    }

    /// Diagnostics view with secret-keyed values redacted
    pub fn redacted_dump(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        redacted_config(&Value::Object(map))
    }
}

/// Usernames rejected for per-service database users
const WEAK_USERNAMES: [&str; 6] = ["test", "admin", "root", "default", "postgres", "demo"];

/// Passwords rejected outright
const WEAK_PASSWORDS: [&str; 4] = ["password", "changeme", "default", "secret"];

const MIN_PASSWORD_LEN: usize = 8;

/// CI-only override: weak credentials are accepted only when this variable
/// carries exactly this value
pub const WEAK_CREDENTIAL_OVERRIDE_VAR: &str = "RANSOMEYE_ALLOW_WEAK_CREDENTIALS";
pub const WEAK_CREDENTIAL_OVERRIDE_VALUE: &str = "ci";

fn override_active() -> bool {
    std::env::var(WEAK_CREDENTIAL_OVERRIDE_VAR)
        .map(|v| v == WEAK_CREDENTIAL_OVERRIDE_VALUE)
        .unwrap_or(false)
}

/// Reject pattern-weak database credentials. Per-service users are
/// mandatory; there are no defaults to fall back to.
pub fn validate_db_credentials(username: &str, password: &Secret) -> CommonResult<()> {
    if override_active() {
        return Ok(());
    }

    let user_lower = username.to_lowercase();
    if WEAK_USERNAMES.iter().any(|w| user_lower == *w) {
        return Err(CommonError::WeakCredential(format!(
            "database username '{}' matches a prohibited pattern",
            username
        )));
    }

    let pass_lower = password.expose().to_lowercase();
    if WEAK_PASSWORDS.iter().any(|w| pass_lower == *w) {
        return Err(CommonError::WeakCredential(
            "database password matches a prohibited pattern".to_string(),
        ));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(CommonError::WeakCredential(format!(
            "database password shorter than {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    Ok(())
}
