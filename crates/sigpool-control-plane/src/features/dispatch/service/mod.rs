use crate::features::observability::controller::ObservabilityController;
use crate::features::provisioning::controller::ProvisionTrigger;
use crate::shared::error::ControlPlaneResult;
use serde::Serialize;
use sigpool_core::{MatchOutcome, ProvisionMode, SessionRequest};
use sigpool_providers::{MatchmakerService, NotifierService, QueueMessage, SessionQueueRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub batch_size: usize,
    pub receive_wait: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            receive_wait: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDisposition {
    /// Forwarded downstream and removed from the queue.
    Matched,
    /// Left on the queue; an on-demand provisioning pass was requested.
    ProvisionTriggered,
    /// Unparsable body, skipped and left on the queue.
    Malformed,
}

impl RequestDisposition {
    pub fn label(self) -> &'static str {
        match self {
            RequestDisposition::Matched => "matched",
            RequestDisposition::ProvisionTriggered => "provision_triggered",
            RequestDisposition::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandledMessage {
    pub message_id: String,
    pub request_id: Option<String>,
    pub disposition: RequestDisposition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub received: usize,
    pub handled: Vec<HandledMessage>,
}

impl DispatchReport {
    pub fn count(&self, disposition: RequestDisposition) -> usize {
        self.handled
            .iter()
            .filter(|h| h.disposition == disposition)
            .count()
    }
}

/// Drains the session queue, resolving each request against the matchmaker.
pub struct DispatchLoop {
    queue: Arc<dyn SessionQueueRepository>,
    matchmaker: Arc<MatchmakerService>,
    notifier: Arc<NotifierService>,
    trigger: Arc<dyn ProvisionTrigger>,
    observability: Arc<ObservabilityController>,
    settings: DispatchSettings,
}

impl DispatchLoop {
    pub fn new(
        queue: Arc<dyn SessionQueueRepository>,
        matchmaker: Arc<MatchmakerService>,
        notifier: Arc<NotifierService>,
        trigger: Arc<dyn ProvisionTrigger>,
        observability: Arc<ObservabilityController>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            matchmaker,
            notifier,
            trigger,
            observability,
            settings,
        }
    }

    /// Process one received batch, in order. The first fatal error stops the
    /// batch; requests not yet acknowledged stay queued for redelivery.
    pub async fn run_once(&self) -> ControlPlaneResult<DispatchReport> {
        let messages = self
            .queue
            .receive(self.settings.batch_size, self.settings.receive_wait)
            .await?;
        self.observability.record_received(messages.len());

        let mut report = DispatchReport {
            received: messages.len(),
            handled: Vec::with_capacity(messages.len()),
        };
        if messages.is_empty() {
            debug!("No session requests waiting");
            return Ok(report);
        }

        info!(count = messages.len(), "Received session requests");
        for message in &messages {
            let handled = self.handle(message).await?;
            self.observability
                .record_disposition(handled.disposition.label());
            report.handled.push(handled);
        }

        info!(
            matched = report.count(RequestDisposition::Matched),
            provision_triggered = report.count(RequestDisposition::ProvisionTriggered),
            malformed = report.count(RequestDisposition::Malformed),
            "Dispatch batch complete"
        );
        Ok(report)
    }

    async fn handle(&self, message: &QueueMessage) -> ControlPlaneResult<HandledMessage> {
        let request = match SessionRequest::from_message_body(&message.body) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %err,
                    "Skipping malformed session request"
                );
                return Ok(HandledMessage {
                    message_id: message.message_id.clone(),
                    request_id: None,
                    disposition: RequestDisposition::Malformed,
                });
            }
        };
        let request_id = request.request_id.clone();

        if let Err(err) = self.notifier.keep_alive(&request).await {
            warn!(%request_id, error = %err, "Keep-alive notification failed");
        }

        let started = Instant::now();
        let outcome = self.matchmaker.find_worker().await;
        self.observability
            .record_matchmaker_latency(started.elapsed().as_secs_f64());

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%request_id, error = %err, "Matchmaker query failed, aborting batch");
                return Err(err.into());
            }
        };

        let disposition = match outcome {
            MatchOutcome::Available(details) => {
                let payload = request.merged_with(&details);
                if let Err(err) = self.notifier.session_details(payload).await {
                    error!(%request_id, error = %err, "Session details hand-off failed, leaving request queued");
                    return Err(err.into());
                }

                if self.queue.acknowledge(&message.receipt_handle).await? {
                    info!(%request_id, "Session request matched and acknowledged");
                } else {
                    warn!(%request_id, "Receipt expired before acknowledgement, request may be redelivered");
                }
                RequestDisposition::Matched
            }
            MatchOutcome::Unavailable => {
                info!(%request_id, "No signalling worker available, requesting capacity");
                if let Err(err) = self.trigger.trigger(ProvisionMode::OnDemand).await {
                    warn!(%request_id, error = %err, "Failed to trigger provisioning");
                }
                RequestDisposition::ProvisionTriggered
            }
        };

        Ok(HandledMessage {
            message_id: message.message_id.clone(),
            request_id: Some(request_id),
            disposition,
        })
    }
}
