//! Core reachability probe
//!
//! A 2-second health request, one attempt, no retries. The answer only
//! selects between online operation (Core has already verified policy)
//! and autonomous fail-closed enforcement.

use async_trait::async_trait;
use std::time::Duration;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Answers "is the Core reachable right now?"
#[async_trait]
pub trait CoreProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// HTTP probe against the Core health endpoint
pub struct HttpCoreProbe {
    client: reqwest::Client,
    health_url: String,
}

impl HttpCoreProbe {
    pub fn new(health_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            health_url: health_url.into(),
        }
    }
}

#[async_trait]
impl CoreProbe for HttpCoreProbe {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Fixed-answer probe for tests
pub struct StaticProbe(pub bool);

#[async_trait]
impl CoreProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}
