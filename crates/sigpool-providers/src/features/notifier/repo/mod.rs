use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigpool_core::{CoreError, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Downstream services informed about a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTarget {
    KeepAlive,
    SessionDetails,
}

impl fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationTarget::KeepAlive => f.write_str("keep_alive"),
            NotificationTarget::SessionDetails => f.write_str("session_details"),
        }
    }
}

/// Fire-and-forget delivery. `dispatch` returns once the notification is
/// handed off; it never waits for the downstream handler to finish.
#[async_trait]
pub trait NotifierRepository: Send + Sync {
    async fn dispatch(&self, target: NotificationTarget, payload: Value) -> Result<()>;
}

/// Posts JSON payloads to per-target URLs on detached tasks.
pub struct HttpNotifierRepository {
    client: Client,
    keep_alive_url: String,
    session_details_url: String,
}

impl HttpNotifierRepository {
    pub fn new(
        keep_alive_url: impl Into<String>,
        session_details_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            CoreError::NotificationError(format!("failed to build http client: {e}"))
        })?;

        Ok(Self {
            client,
            keep_alive_url: keep_alive_url.into(),
            session_details_url: session_details_url.into(),
        })
    }

    fn url_for(&self, target: NotificationTarget) -> &str {
        match target {
            NotificationTarget::KeepAlive => &self.keep_alive_url,
            NotificationTarget::SessionDetails => &self.session_details_url,
        }
    }
}

#[async_trait]
impl NotifierRepository for HttpNotifierRepository {
    async fn dispatch(&self, target: NotificationTarget, payload: Value) -> Result<()> {
        let url = self.url_for(target).to_string();
        let request = self.client.post(&url).json(&payload).build().map_err(|e| {
            CoreError::NotificationError(format!("invalid {target} notification request: {e}"))
        })?;

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.execute(request).await {
                Ok(response) if response.status().is_success() => {
                    debug!(%target, status = response.status().as_u16(), "Notification delivered");
                }
                Ok(response) => {
                    warn!(%target, %url, status = response.status().as_u16(), "Notification rejected downstream");
                }
                Err(error) => {
                    warn!(%target, %url, error = %error, "Notification delivery failed");
                }
            }
        });

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredNotification {
    pub target: NotificationTarget,
    pub payload: Value,
}

/// Records notifications in memory; used in local mode and tests.
#[derive(Clone, Default)]
pub struct InMemoryNotifierRepository {
    delivered: Arc<RwLock<Vec<DeliveredNotification>>>,
    rejected_targets: Arc<RwLock<HashSet<NotificationTarget>>>,
}

impl InMemoryNotifierRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent dispatch to `target` fail at hand-off.
    pub fn reject(&self, target: NotificationTarget) {
        if let Ok(mut rejected) = self.rejected_targets.write() {
            rejected.insert(target);
        }
    }

    pub fn delivered(&self) -> Vec<DeliveredNotification> {
        self.delivered
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn delivered_to(&self, target: NotificationTarget) -> Vec<Value> {
        self.delivered()
            .into_iter()
            .filter(|n| n.target == target)
            .map(|n| n.payload)
            .collect()
    }
}

#[async_trait]
impl NotifierRepository for InMemoryNotifierRepository {
    async fn dispatch(&self, target: NotificationTarget, payload: Value) -> Result<()> {
        let rejected = self
            .rejected_targets
            .read()
            .map(|r| r.contains(&target))
            .unwrap_or(false);
        if rejected {
            return Err(CoreError::NotificationError(format!(
                "{target} notifier unavailable"
            )));
        }

        let mut delivered = self.delivered.write().map_err(|_| {
            CoreError::NotificationError("Notifier lock poisoned".to_string())
        })?;
        delivered.push(DeliveredNotification { target, payload });
        Ok(())
    }
}
