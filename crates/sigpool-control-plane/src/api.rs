//! HTTP invocation surface over the dispatch loop and provisioner.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sigpool_core::{ErrorResponse, InvocationResponse, SessionRequest};
use sigpool_providers::SessionQueueRepository;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::features::capacity_table::service::CapacityTableService;
use crate::features::dispatch::controller::DispatchController;
use crate::features::observability::controller::ObservabilityController;
use crate::features::provisioning::controller::ProvisionController;
use crate::shared::error::ControlPlaneError;
use crate::shared::types::{EnqueueResponse, ProvisionRequest};

#[derive(Clone)]
pub struct ApiState {
    pub dispatch: Arc<DispatchController>,
    pub provision: Arc<ProvisionController>,
    pub queue: Arc<dyn SessionQueueRepository>,
    pub capacity: Arc<CapacityTableService>,
    pub observability: Arc<ObservabilityController>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/dispatch", post(dispatch))
        .route("/v1/provision", post(provision))
        .route("/v1/queue", post(enqueue))
        .route("/v1/slots", get(list_slots))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn invocation_response(response: InvocationResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

fn error_response(err: ControlPlaneError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(err))).into_response()
}

fn record(state: &ApiState, endpoint: &str, status: StatusCode, started: Instant) {
    state.observability.record_api_request(
        endpoint,
        status.as_str(),
        started.elapsed().as_secs_f64(),
    );
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn metrics(State(state): State<ApiState>) -> Response {
    match state.observability.render_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => error_response(err),
    }
}

async fn dispatch(State(state): State<ApiState>) -> Response {
    let started = Instant::now();
    let response = invocation_response(state.dispatch.invoke().await);
    record(&state, "dispatch", response.status(), started);
    response
}

async fn provision(
    State(state): State<ApiState>,
    Json(request): Json<ProvisionRequest>,
) -> Response {
    let started = Instant::now();
    let response = invocation_response(state.provision.invoke(request).await);
    record(&state, "provision", response.status(), started);
    response
}

async fn enqueue(State(state): State<ApiState>, Json(request): Json<SessionRequest>) -> Response {
    let started = Instant::now();
    let response = match serde_json::to_string(&request) {
        Ok(body) => match state.queue.send(body).await {
            Ok(message_id) => {
                info!(request_id = %request.request_id, %message_id, "Session request enqueued");
                (
                    StatusCode::ACCEPTED,
                    Json(EnqueueResponse {
                        message_id,
                        request_id: request.request_id,
                    }),
                )
                    .into_response()
            }
            Err(err) => error_response(err.into()),
        },
        Err(err) => error_response(ControlPlaneError::Serialization(err.to_string())),
    };
    record(&state, "queue", response.status(), started);
    response
}

async fn list_slots(State(state): State<ApiState>) -> Response {
    let started = Instant::now();
    let response = match state.capacity.list_slots().await {
        Ok(slots) => (StatusCode::OK, Json(slots)).into_response(),
        Err(err) => error_response(err),
    };
    record(&state, "slots", response.status(), started);
    response
}
