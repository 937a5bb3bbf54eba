// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::capability::Capability;
use crate::domain::worker::WorkerId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// One inbound unit of work. Immutable after creation.
///
/// The deadline is a monotonic clock value; every nested wait derives its
/// budget from `remaining()` so hops can only shrink it.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub capabilities: Vec<Capability>,
    pub payload: serde_json::Value,
    pub deadline: Instant,
    pub priority: Priority,
}

impl Request {
    pub fn new(
        capabilities: Vec<Capability>,
        payload: serde_json::Value,
        budget: Duration,
        priority: Priority,
    ) -> Self {
        Self {
            id: RequestId::new(),
            capabilities,
            payload,
            deadline: Instant::now() + budget,
            priority,
        }
    }

    /// Derive a single-capability sub-request sharing this request's payload
    /// and priority, with its own (smaller) deadline slice.
    pub fn sub_request(&self, capability: Capability, slice: Duration) -> Self {
        Self {
            id: RequestId::new(),
            capabilities: vec![capability],
            payload: self.payload.clone(),
            deadline: Instant::now() + slice,
            priority: self.priority,
        }
    }

    /// Time left before the deadline, zero once elapsed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Success,
    Timeout,
    Error,
}

/// The component that produced a terminal response. Carried on every
/// result so callers can tell "slow but correct" from "degraded but safe"
/// from "failed" without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Registry,
    Router,
    Collaboration,
    Breaker,
    Context,
    Worker,
}

/// Outcome of routing one request to one worker.
///
/// Exactly one record exists per (request id, worker id) attempt; the
/// router emits one on the event bus for every attempt, not only the
/// terminal one.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub request_id: RequestId,
    pub worker_id: Option<WorkerId>,
    pub capability: Capability,
    pub status: DispatchStatus,
    pub elapsed_ms: u64,
    pub component: Component,
    /// Present on success; absent on timeout/error.
    pub payload: Option<serde_json::Value>,
    /// Entity/field recommendations contributed by the worker, consumed
    /// by collaboration conflict resolution.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<crate::domain::worker::GuidanceItem>,
    pub error: Option<String>,
    /// True when the payload was served from a dependency's stale cache
    /// while its breaker was open.
    #[serde(default)]
    pub stale: bool,
    /// True when cross-project peer validation was skipped because the
    /// peer channel's breaker was open.
    #[serde(default)]
    pub peer_validation_skipped: bool,
}

impl DispatchResult {
    pub fn success(
        request_id: RequestId,
        worker_id: WorkerId,
        capability: Capability,
        payload: serde_json::Value,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id,
            worker_id: Some(worker_id),
            capability,
            status: DispatchStatus::Success,
            elapsed_ms: elapsed.as_millis() as u64,
            component: Component::Worker,
            payload: Some(payload),
            guidance: Vec::new(),
            error: None,
            stale: false,
            peer_validation_skipped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::Capability;

    #[test]
    fn test_remaining_shrinks_never_grows() {
        let request = Request::new(
            vec![Capability::parse("entity-guidance").unwrap()],
            serde_json::json!({}),
            Duration::from_millis(50),
            Priority::Normal,
        );
        let first = request.remaining();
        let second = request.remaining();
        assert!(second <= first);
        assert!(first <= Duration::from_millis(50));
    }

    #[test]
    fn test_sub_request_inherits_payload_and_priority() {
        let request = Request::new(
            vec![
                Capability::parse("a").unwrap(),
                Capability::parse("b").unwrap(),
            ],
            serde_json::json!({"screen": "orders"}),
            Duration::from_secs(2),
            Priority::High,
        );
        let sub = request.sub_request(Capability::parse("a").unwrap(), Duration::from_secs(1));
        assert_ne!(sub.id, request.id);
        assert_eq!(sub.capabilities.len(), 1);
        assert_eq!(sub.payload, request.payload);
        assert_eq!(sub.priority, Priority::High);
        assert!(sub.remaining() <= Duration::from_secs(1));
    }
}
