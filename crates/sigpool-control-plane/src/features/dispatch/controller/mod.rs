use std::sync::Arc;
use std::time::Duration;

use sigpool_core::{ErrorResponse, InvocationResponse};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::features::dispatch::service::DispatchLoop;
use crate::features::observability::controller::ObservabilityController;

pub struct DispatchController {
    dispatch: Arc<DispatchLoop>,
    observability: Arc<ObservabilityController>,
    interval: Duration,
}

impl DispatchController {
    pub fn new(
        dispatch: Arc<DispatchLoop>,
        observability: Arc<ObservabilityController>,
        interval: Duration,
    ) -> Self {
        Self {
            dispatch,
            observability,
            interval,
        }
    }

    /// One dispatch invocation: 200 with the batch report, or the error's
    /// status (502 matchmaker, 504 timeout, 500 otherwise).
    pub async fn invoke(&self) -> InvocationResponse {
        match self.dispatch.run_once().await {
            Ok(report) => InvocationResponse::ok(&report),
            Err(err) => {
                let status = match err.status_code() {
                    502 | 504 => err.status_code(),
                    _ => 500,
                };
                self.observability.record_dispatch_failure(err.error_code());
                error!(error = %err, status, "Dispatch invocation failed");
                InvocationResponse::error(status, ErrorResponse::from(err))
            }
        }
    }

    /// Run `invoke` on a fixed interval until the task is aborted.
    pub fn spawn_periodic_polling(self: Arc<Self>) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs_f64(), "Starting periodic dispatch");
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                let response = self.invoke().await;
                if response.is_success() {
                    debug!("Scheduled dispatch completed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dispatch::service::tests::{reply, RecordingTrigger, ScriptedMatchmaker};
    use crate::features::dispatch::service::DispatchSettings;
    use serde_json::json;
    use sigpool_core::CoreError;
    use sigpool_providers::{
        InMemoryNotifierRepository, InMemorySessionQueue, MatchmakerService, NotifierService,
        SessionQueueRepository,
    };

    fn create_test_controller(
        matchmaker: ScriptedMatchmaker,
        queue: InMemorySessionQueue,
    ) -> (Arc<DispatchController>, Arc<ObservabilityController>) {
        let observability = ObservabilityController::with_registry().unwrap();
        let dispatch = DispatchLoop::new(
            Arc::new(queue),
            Arc::new(MatchmakerService::new(
                Arc::new(matchmaker),
                "http://matchmaker",
                "secret",
            )),
            Arc::new(NotifierService::new(Arc::new(
                InMemoryNotifierRepository::new(),
            ))),
            Arc::new(RecordingTrigger::default()),
            observability.clone(),
            DispatchSettings {
                batch_size: 10,
                receive_wait: Duration::ZERO,
            },
        );
        (
            Arc::new(DispatchController::new(
                Arc::new(dispatch),
                observability.clone(),
                Duration::from_secs(60),
            )),
            observability,
        )
    }

    async fn queue_with_request() -> InMemorySessionQueue {
        let queue = InMemorySessionQueue::default();
        queue
            .send(json!({"requestId": "r1", "connectionId": "c1", "body": {}}).to_string())
            .await
            .unwrap();
        queue
    }

    #[tokio::test]
    async fn test_successful_dispatch_reports_batch() {
        let queue = queue_with_request().await;
        let (controller, _) = create_test_controller(
            ScriptedMatchmaker::new(vec![reply(200, r#"{"server":"a"}"#)]),
            queue,
        );

        let response = controller.invoke().await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["received"], 1);
        assert_eq!(response.body["handled"][0]["disposition"], "matched");
        assert_eq!(response.body["handled"][0]["requestId"], "r1");
    }

    #[tokio::test]
    async fn test_matchmaker_failure_maps_to_bad_gateway() {
        let queue = queue_with_request().await;
        let (controller, observability) =
            create_test_controller(ScriptedMatchmaker::new(vec![reply(500, "boom")]), queue);

        let response = controller.invoke().await;

        assert_eq!(response.status_code, 502);
        assert_eq!(response.body["error_code"], "MATCHMAKER_ERROR");
        assert!(observability
            .render_metrics()
            .unwrap()
            .contains("error_code=\"MATCHMAKER_ERROR\""));
    }

    #[tokio::test]
    async fn test_matchmaker_timeout_maps_to_gateway_timeout() {
        let queue = queue_with_request().await;
        let (controller, _) = create_test_controller(
            ScriptedMatchmaker::new(vec![Err(CoreError::Timeout("10s".to_string()))]),
            queue,
        );

        let response = controller.invoke().await;

        assert_eq!(response.status_code, 504);
        assert_eq!(response.body["error_code"], "TIMEOUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_polling_drains_queue() {
        let queue = queue_with_request().await;
        let (controller, _) = create_test_controller(
            ScriptedMatchmaker::new(vec![reply(200, r#"{"server":"a"}"#)]),
            queue.clone(),
        );

        let handle = controller.spawn_periodic_polling();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.len().await, 0);

        queue
            .send(json!({"requestId": "r2", "connectionId": "c2", "body": {}}).to_string())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(queue.len().await, 0);

        handle.abort();
    }
}
