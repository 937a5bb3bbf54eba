// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::capability::Capability;
use crate::domain::dependency::BreakerState;
use crate::domain::request::{DispatchStatus, RequestId};
use crate::domain::worker::WorkerId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit record emitted for every dispatch attempt, terminal or not.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub request_id: RequestId,
    pub worker_id: Option<WorkerId>,
    pub capability: Capability,
    pub status: DispatchStatus,
    pub attempt: u8,
    pub elapsed_ms: u64,
    pub stale: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Breaker state transition, published for observability.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerTransition {
    pub dependency: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
}

/// Unified domain event type for the event bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Dispatch(DispatchRecord),
    Breaker(BreakerTransition),
}
