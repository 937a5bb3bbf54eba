// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface tests: dispatch routing, worker lifecycle endpoints, and
//! the error-to-status mapping.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use guidepost_core::application::CoreServices;
use guidepost_core::domain::capability::Capability;
use guidepost_core::domain::request::Request;
use guidepost_core::domain::worker::{HealthState, Worker, WorkerFailure, WorkerReply};
use guidepost_core::infrastructure::config::CoreConfig;
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;

struct EchoWorker {
    capabilities: HashSet<Capability>,
}

impl EchoWorker {
    fn new(capability: &str) -> Arc<Self> {
        Arc::new(Self {
            capabilities: [Capability::parse(capability).unwrap()].into_iter().collect(),
        })
    }
}

#[async_trait]
impl Worker for EchoWorker {
    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    async fn handle(&self, request: &Request) -> Result<WorkerReply, WorkerFailure> {
        Ok(WorkerReply::from_payload(request.payload.clone()))
    }

    async fn health(&self) -> HealthState {
        HealthState::Healthy
    }
}

fn post(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> HttpRequest<Body> {
    HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_dispatch_single_capability() {
    let services = CoreServices::new(CoreConfig::default());
    services
        .registry
        .register("echo", EchoWorker::new("entity-guidance"));
    let app = guidepost_core::presentation::app(services);

    let response = app
        .oneshot(post(
            "/dispatch",
            serde_json::json!({
                "capabilities": ["entity-guidance"],
                "payload": {"screen": "orders"},
                "deadline_ms": 2000,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dispatch"]["status"], "success");
    assert_eq!(body["dispatch"]["payload"]["screen"], "orders");
}

#[tokio::test]
async fn test_dispatch_multi_capability_returns_collaboration() {
    let services = CoreServices::new(CoreConfig::default());
    services
        .registry
        .register("wa", EchoWorker::new("entity-guidance"));
    services
        .registry
        .register("wb", EchoWorker::new("layout-guidance"));
    let app = guidepost_core::presentation::app(services);

    let response = app
        .oneshot(post(
            "/dispatch",
            serde_json::json!({
                "capabilities": ["entity-guidance", "layout-guidance"],
                "payload": {},
                "deadline_ms": 2000,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["collaboration"]["completed"].as_array().unwrap().len(), 2);
    assert!(body["collaboration"]["missing"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_capability_maps_to_not_found() {
    let services = CoreServices::new(CoreConfig::default());
    let app = guidepost_core::presentation::app(services);

    let response = app
        .oneshot(post(
            "/dispatch",
            serde_json::json!({
                "capabilities": ["entity-guidance"],
                "payload": {},
                "deadline_ms": 1000,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["component"], "registry");
}

#[tokio::test]
async fn test_invalid_capability_name_rejected() {
    let services = CoreServices::new(CoreConfig::default());
    let app = guidepost_core::presentation::app(services);

    // Capability names are validated during deserialization.
    let response = app
        .oneshot(post(
            "/dispatch",
            serde_json::json!({
                "capabilities": ["Not Valid"],
                "payload": {},
                "deadline_ms": 1000,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_worker_lifecycle_endpoints() {
    let services = CoreServices::new(CoreConfig::default());
    let descriptor = services
        .registry
        .register("echo", EchoWorker::new("entity-guidance"));
    let app = guidepost_core::presentation::app(services);

    let response = app.clone().oneshot(get("/workers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["workers"].as_array().unwrap().len(), 1);
    assert_eq!(body["workers"][0]["health"], "healthy");

    let response = app
        .clone()
        .oneshot(post(
            &format!("/workers/{}/heartbeat", descriptor.id),
            serde_json::json!({"health": "degraded"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());

    let response = app
        .clone()
        .oneshot(
            HttpRequest::builder()
                .method("DELETE")
                .uri(format!("/workers/{}", descriptor.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(get("/workers")).await.unwrap();
    let body = body_json(response).await;
    assert!(body["workers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_breaker_listing() {
    let yaml = r#"
dependencies:
  - name: backend-api
    class: backend
"#;
    let services = CoreServices::new(CoreConfig::from_yaml(yaml).unwrap());
    let app = guidepost_core::presentation::app(services);

    let response = app.oneshot(get("/breakers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["breakers"][0]["dependency"], "backend-api");
    assert_eq!(body["breakers"][0]["state"], "closed");
}
