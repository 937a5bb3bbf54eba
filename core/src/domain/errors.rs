// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::capability::Capability;
use thiserror::Error;

/// Terminal error taxonomy surfaced to callers.
///
/// `CapabilityMismatch` and `ContextUnavailable` are never retried;
/// `Timeout`/`WorkerError` have already consumed their single failover
/// retry by the time they surface. `ServiceDegraded` escalates to an error
/// only when no fallback data existed.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("no healthy candidate for capability '{0}'")]
    CapabilityMismatch(Capability),

    #[error("deadline exceeded dispatching capability '{capability}' after {elapsed_ms}ms")]
    Timeout {
        capability: Capability,
        elapsed_ms: u64,
    },

    #[error("worker error for capability '{capability}': {message}")]
    WorkerError {
        capability: Capability,
        message: String,
    },

    #[error("collaboration failed: {0}")]
    CollaborationConflict(String),

    #[error("dependency '{dependency}' degraded and no fallback data cached")]
    ServiceDegraded { dependency: String },

    #[error("context store unavailable: {0}")]
    ContextUnavailable(String),
}

impl DispatchError {
    /// Whether an internal failover retry may change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout { .. } | DispatchError::WorkerError { .. }
        )
    }
}
