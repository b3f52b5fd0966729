pub mod repo;
pub mod service;

use repo::ReqwestMatchmakerRepository;
use service::MatchmakerService;
use sigpool_core::Result;
use std::sync::Arc;
use std::time::Duration;

/// Matchmaker client over HTTP with a bounded per-query timeout.
pub fn http_matchmaker(
    endpoint: impl Into<String>,
    client_secret: impl Into<String>,
    timeout: Duration,
) -> Result<MatchmakerService> {
    let repo = Arc::new(ReqwestMatchmakerRepository::new(timeout)?);
    Ok(MatchmakerService::new(repo, endpoint, client_secret))
}
