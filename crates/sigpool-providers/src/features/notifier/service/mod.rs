use crate::features::notifier::repo::{NotificationTarget, NotifierRepository};
use serde_json::Value;
use sigpool_core::{CoreError, Result, SessionRequest};
use std::sync::Arc;

pub struct NotifierService {
    repo: Arc<dyn NotifierRepository>,
}

impl NotifierService {
    pub fn new(repo: Arc<dyn NotifierRepository>) -> Self {
        Self { repo }
    }

    /// Tell the client its connection is still being worked on.
    pub async fn keep_alive(&self, request: &SessionRequest) -> Result<()> {
        let payload = serde_json::to_value(request).map_err(|e| {
            CoreError::SerializationError(format!("failed to encode keep-alive payload: {e}"))
        })?;
        self.repo.dispatch(NotificationTarget::KeepAlive, payload).await
    }

    /// Forward the matched session details to the client-facing service.
    pub async fn session_details(&self, payload: Value) -> Result<()> {
        if !payload.is_object() {
            return Err(CoreError::InvalidRequest(
                "session details payload must be a JSON object".to_string(),
            ));
        }
        self.repo
            .dispatch(NotificationTarget::SessionDetails, payload)
            .await
    }
}
