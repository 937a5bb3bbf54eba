// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::capability::Capability;
use crate::domain::request::{Component, DispatchResult, RequestId};
use crate::domain::resolution::Resolution;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope of one multi-capability request's collaboration and shared
/// context. The session id is the originating request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<RequestId> for SessionId {
    fn from(id: RequestId) -> Self {
        Self(id.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Aggregated outcome of one collaboration session.
///
/// A partial outcome is a success response: completed sub-results plus an
/// explicit list of missing capabilities, never a fabricated placeholder.
#[derive(Debug, Clone, Serialize)]
pub struct CollaborationOutcome {
    pub session_id: SessionId,
    pub completed: Vec<DispatchResult>,
    pub resolution: Resolution,
    /// Capabilities whose sub-dispatch did not resolve before the session
    /// deadline.
    pub missing: Vec<Capability>,
    pub elapsed_ms: u64,
    pub component: Component,
}

impl CollaborationOutcome {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}
