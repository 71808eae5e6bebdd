//! Command dispatch to managed hosts
//!
//! One attempt per command, 30 s timeout, authenticated channel. No
//! retries: a failed dispatch marks the action FAILED and a human decides
//! what happens next.

use async_trait::async_trait;
use ransomeye_types::SignedCommand;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{Result, TreError};

pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport to an agent's command gate
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Deliver one signed command. `Ok(true)` means the gate accepted it.
    async fn deliver(&self, command: &SignedCommand) -> Result<bool>;
}

/// HTTPS transport with service-to-service auth
pub struct HttpAgentTransport {
    client: reqwest::Client,
    endpoint: String,
    auth_token: String,
}

impl HttpAgentTransport {
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .map_err(|e| TreError::Dispatch(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            auth_token: auth_token.into(),
        })
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn deliver(&self, command: &SignedCommand) -> Result<bool> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.auth_token)
            .json(command)
            .send()
            .await
            .map_err(|e| TreError::Dispatch(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// In-memory transport for tests: records delivered commands and answers
/// with a configurable verdict
pub struct MemoryTransport {
    pub accept: bool,
    delivered: Mutex<Vec<SignedCommand>>,
}

impl MemoryTransport {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub async fn delivered(&self) -> Vec<SignedCommand> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl AgentTransport for MemoryTransport {
    async fn deliver(&self, command: &SignedCommand) -> Result<bool> {
        self.delivered.lock().await.push(command.clone());
        Ok(self.accept)
    }
}
