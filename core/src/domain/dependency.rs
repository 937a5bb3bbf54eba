// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class of an external dependency, which determines the fallback policy
/// applied when its breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyClass {
    /// Backend/business-data API: serve last-known cached value with a
    /// staleness flag, or degrade to read-only for the bound capability.
    Backend,
    /// Cross-process peer-agent channel: continue with local-only guidance
    /// and queue the skipped validation for replay.
    Peer,
    /// Local persistent state: the whole process enters read-only mode for
    /// context writes until the breaker closes again.
    Persistence,
}

/// Resilience state for one named dependency. Only the breaker state
/// machine transitions it; it is never assigned directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Error)]
pub enum DependencyError {
    #[error("dependency call timed out")]
    Timeout,

    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("dependency contract mismatch: {0}")]
    ContractMismatch(String),
}

/// Contract implemented by the external backend/store collaborators that
/// breakers guard. The core never calls a dependency except through its
/// breaker.
#[async_trait]
pub trait Dependency: Send + Sync {
    fn name(&self) -> &str;

    fn class(&self) -> DependencyClass;

    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, DependencyError>;
}
