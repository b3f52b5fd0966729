use crate::features::matchmaker::repo::{MatchmakerQuery, MatchmakerRepository, MatchmakerResponse};
use serde_json::Value;
use sigpool_core::{CoreError, MatchOutcome, Result};
use std::sync::Arc;
use tracing::debug;

/// Status the matchmaker uses to say no signalling worker is free.
pub const NO_CAPACITY_STATUS: u16 = 400;

pub struct MatchmakerService {
    repo: Arc<dyn MatchmakerRepository>,
    query: MatchmakerQuery,
}

impl MatchmakerService {
    pub fn new(
        repo: Arc<dyn MatchmakerRepository>,
        endpoint: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            query: MatchmakerQuery {
                endpoint: endpoint.into(),
                client_secret: client_secret.into(),
            },
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.query.endpoint
    }

    /// Ask the matchmaker for a ready worker.
    pub async fn find_worker(&self) -> Result<MatchOutcome> {
        let response = self.repo.query(&self.query).await?;
        debug!(endpoint = %self.query.endpoint, status = response.status, "Matchmaker responded");
        classify(response)
    }
}

fn classify(response: MatchmakerResponse) -> Result<MatchOutcome> {
    match response.status {
        200..=299 => {
            let parsed: Value = serde_json::from_str(&response.body).map_err(|e| {
                CoreError::MatchmakerError(format!("matchmaker returned invalid JSON: {e}"))
            })?;

            match parsed {
                Value::Object(fields) => Ok(MatchOutcome::Available(fields)),
                other => Err(CoreError::MatchmakerError(format!(
                    "matchmaker returned non-object JSON: {other}"
                ))),
            }
        }
        NO_CAPACITY_STATUS => Ok(MatchOutcome::Unavailable),
        status => Err(CoreError::MatchmakerError(format!(
            "unexpected matchmaker status {status}: {}",
            response.body
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::RwLock;

    struct StubRepo {
        result: Result<MatchmakerResponse>,
        last_query: RwLock<Option<MatchmakerQuery>>,
    }

    impl StubRepo {
        fn responding(status: u16, body: &str) -> Self {
            Self {
                result: Ok(MatchmakerResponse {
                    status,
                    body: body.to_string(),
                }),
                last_query: RwLock::new(None),
            }
        }

        fn failing(error: CoreError) -> Self {
            Self {
                result: Err(error),
                last_query: RwLock::new(None),
            }
        }
    }

    #[async_trait]
    impl MatchmakerRepository for StubRepo {
        async fn query(&self, query: &MatchmakerQuery) -> Result<MatchmakerResponse> {
            if let Ok(mut slot) = self.last_query.write() {
                *slot = Some(query.clone());
            }
            self.result.clone()
        }
    }

    fn service_with(repo: Arc<StubRepo>) -> MatchmakerService {
        MatchmakerService::new(repo, "http://matchmaker/signallingserver", "secret")
    }

    #[tokio::test]
    async fn test_success_with_object_is_available() {
        let service = service_with(Arc::new(StubRepo::responding(
            200,
            r#"{"server":"10.0.0.5","port":80}"#,
        )));

        let outcome = service.find_worker().await.unwrap();
        let expected = json!({"server": "10.0.0.5", "port": 80});
        assert_eq!(
            outcome,
            MatchOutcome::Available(expected.as_object().unwrap().clone())
        );
    }

    #[tokio::test]
    async fn test_other_2xx_is_available() {
        let service = service_with(Arc::new(StubRepo::responding(202, r#"{"server":"a"}"#)));
        assert!(matches!(
            service.find_worker().await.unwrap(),
            MatchOutcome::Available(_)
        ));
    }

    #[tokio::test]
    async fn test_400_is_unavailable() {
        let service = service_with(Arc::new(StubRepo::responding(400, "no servers")));
        assert_eq!(service.find_worker().await.unwrap(), MatchOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_other_status_is_error() {
        for status in [401, 403, 404, 500, 503] {
            let service = service_with(Arc::new(StubRepo::responding(status, "nope")));
            let err = service.find_worker().await.unwrap_err();
            assert!(matches!(err, CoreError::MatchmakerError(_)), "status {status}");
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_error() {
        let service = service_with(Arc::new(StubRepo::responding(200, "<html>")));
        assert!(matches!(
            service.find_worker().await,
            Err(CoreError::MatchmakerError(_))
        ));
    }

    #[tokio::test]
    async fn test_non_object_json_is_error() {
        let service = service_with(Arc::new(StubRepo::responding(200, "[1,2]")));
        assert!(service.find_worker().await.is_err());
    }

    #[tokio::test]
    async fn test_transport_timeout_is_propagated() {
        let service = service_with(Arc::new(StubRepo::failing(CoreError::Timeout(
            "10s elapsed".to_string(),
        ))));
        assert!(matches!(
            service.find_worker().await,
            Err(CoreError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_query_carries_endpoint_and_secret() {
        let repo = Arc::new(StubRepo::responding(400, ""));
        let service = service_with(repo.clone());
        service.find_worker().await.unwrap();

        let query = repo.last_query.read().unwrap().clone().unwrap();
        assert_eq!(query.endpoint, "http://matchmaker/signallingserver");
        assert_eq!(query.client_secret, "secret");
    }
}
