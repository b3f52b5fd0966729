use async_trait::async_trait;
use reqwest::Client;
use sigpool_core::{CoreError, Result};
use std::time::Duration;

/// Header carrying the shared secret on every availability query.
pub const CLIENT_SECRET_HEADER: &str = "clientsecret";

#[derive(Clone)]
pub struct MatchmakerQuery {
    pub endpoint: String,
    pub client_secret: String,
}

impl std::fmt::Debug for MatchmakerQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakerQuery")
            .field("endpoint", &self.endpoint)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MatchmakerResponse {
    pub status: u16,
    pub body: String,
}

/// Raw transport to the availability service. Classification happens in the
/// service layer; this only reports what came back on the wire.
#[async_trait]
pub trait MatchmakerRepository: Send + Sync {
    async fn query(&self, query: &MatchmakerQuery) -> Result<MatchmakerResponse>;
}

pub struct ReqwestMatchmakerRepository {
    client: Client,
}

impl ReqwestMatchmakerRepository {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            CoreError::MatchmakerError(format!("failed to build http client: {e}"))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MatchmakerRepository for ReqwestMatchmakerRepository {
    async fn query(&self, query: &MatchmakerQuery) -> Result<MatchmakerResponse> {
        let response = self
            .client
            .get(&query.endpoint)
            .header(CLIENT_SECRET_HEADER, &query.client_secret)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::Timeout(format!("matchmaker query timed out: {e}"))
                } else {
                    CoreError::MatchmakerError(format!("failed to reach matchmaker: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::Timeout(format!("matchmaker response timed out: {e}"))
            } else {
                CoreError::SerializationError(format!("failed to read matchmaker response: {e}"))
            }
        })?;

        Ok(MatchmakerResponse { status, body })
    }
}
