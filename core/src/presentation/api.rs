// Ingress API
//
// Accepts a request declaring one or more capabilities and returns either
// a single dispatch result or a collaboration outcome. Error responses
// map 1:1 onto the dispatch error taxonomy and always carry the
// triggering component and elapsed time.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::application::CoreServices;
use crate::domain::capability::Capability;
use crate::domain::errors::DispatchError;
use crate::domain::request::{Component, Priority, Request};
use crate::domain::worker::{HealthState, WorkerId};

pub struct AppState {
    pub services: CoreServices,
}

pub fn app(services: CoreServices) -> Router {
    let state = Arc::new(AppState { services });

    Router::new()
        .route("/dispatch", post(dispatch))
        .route("/workers", get(list_workers))
        .route("/workers/{id}/heartbeat", post(heartbeat))
        .route("/workers/{id}", delete(deregister))
        .route("/breakers", get(list_breakers))
        .with_state(state)
}

#[derive(serde::Deserialize)]
pub struct DispatchRequest {
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub deadline_ms: u64,
    #[serde(default)]
    pub priority: Priority,
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DispatchRequest>,
) -> impl IntoResponse {
    let started = Instant::now();
    if body.capabilities.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "at least one capability is required",
                "component": Component::Router,
                "elapsed_ms": 0,
            })),
        );
    }

    let request = Request::new(
        body.capabilities,
        body.payload,
        Duration::from_millis(body.deadline_ms),
        body.priority,
    );

    if request.capabilities.len() == 1 {
        match state.services.router.dispatch(&request).await {
            Ok(result) => (StatusCode::OK, Json(json!({ "dispatch": result }))),
            Err(error) => error_response(error, started),
        }
    } else {
        match state.services.collaboration.dispatch_multi(&request).await {
            Ok(outcome) => (StatusCode::OK, Json(json!({ "collaboration": outcome }))),
            Err(error) => error_response(error, started),
        }
    }
}

async fn list_workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "workers": state.services.registry.workers() }))
}

#[derive(serde::Deserialize)]
pub struct HeartbeatRequest {
    pub health: HealthState,
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let Ok(worker_id) = WorkerId::from_string(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid worker id" })),
        )
            .into_response();
    };
    match state.services.registry.heartbeat(&worker_id, body.health) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

async fn deregister(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(worker_id) = WorkerId::from_string(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid worker id" })),
        )
            .into_response();
    };
    if state.services.registry.deregister(&worker_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown worker" })),
        )
            .into_response()
    }
}

async fn list_breakers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "breakers": state.services.bank.snapshots() }))
}

fn error_response(error: DispatchError, started: Instant) -> (StatusCode, Json<serde_json::Value>) {
    let (status, component) = match &error {
        DispatchError::CapabilityMismatch(_) => (StatusCode::NOT_FOUND, Component::Registry),
        DispatchError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, Component::Router),
        DispatchError::WorkerError { .. } => (StatusCode::BAD_GATEWAY, Component::Worker),
        DispatchError::CollaborationConflict(_) => (StatusCode::CONFLICT, Component::Collaboration),
        DispatchError::ServiceDegraded { .. } => (StatusCode::SERVICE_UNAVAILABLE, Component::Breaker),
        DispatchError::ContextUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, Component::Context),
    };
    (
        status,
        Json(json!({
            "error": error.to_string(),
            "component": component,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        })),
    )
}
