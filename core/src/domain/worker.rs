// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::capability::Capability;
use crate::domain::request::Request;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Live health of a worker as evidenced by heartbeats.
///
/// Transitions follow heartbeat evidence only; the registry never guesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    /// Ordering rank used by candidate selection: lower is preferred.
    pub fn rank(self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Degraded => 1,
            HealthState::Unhealthy => 2,
        }
    }

    pub fn is_dispatchable(self) -> bool {
        self != HealthState::Unhealthy
    }
}

/// Registry view of one registered worker instance.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerDescriptor {
    pub id: WorkerId,
    pub name: String,
    pub capabilities: HashSet<Capability>,
    pub health: HealthState,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// One entity/field recommendation contributed by a worker.
///
/// Two guidance items conflict when they target the same (entity, field)
/// pair with different recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceItem {
    pub entity: String,
    pub field: String,
    pub recommendation: serde_json::Value,
    /// Revision timestamp of the guidance source backing this item.
    pub revised_at: DateTime<Utc>,
}

/// Successful output of one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub guidance: Vec<GuidanceItem>,
}

impl WorkerReply {
    pub fn from_payload(payload: serde_json::Value) -> Self {
        Self {
            payload,
            guidance: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum WorkerFailure {
    #[error("worker rejected request: {0}")]
    Rejected(String),

    #[error("worker failed to produce guidance: {0}")]
    Internal(String),
}

/// Contract implemented by the external guidance generators.
///
/// Workers are stateless from the core's perspective; any caching they do
/// is their own concern.
#[async_trait]
pub trait Worker: Send + Sync {
    fn capabilities(&self) -> HashSet<Capability>;

    async fn handle(&self, request: &Request) -> Result<WorkerReply, WorkerFailure>;

    async fn health(&self) -> HealthState;
}
