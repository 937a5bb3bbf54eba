// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Collaboration Controller - Multi-Capability Fan-Out
//
// Splits a request spanning several capabilities into one sub-request per
// capability, each inheriting an even slice of the remaining deadline so
// fan-out cannot silently extend total latency. Sub-dispatches run
// concurrently through the router; the session waits for all of them or
// for the session deadline, whichever comes first.
//
// Completed sub-results are reconciled by the pure `resolve` function;
// missing capabilities are reported explicitly, never papered over with
// fabricated placeholders.

use crate::domain::capability::Capability;
use crate::domain::errors::DispatchError;
use crate::domain::request::{Component, DispatchResult, Request};
use crate::domain::resolution::{resolve, SubResult};
use crate::domain::session::{CollaborationOutcome, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::CapabilityRegistry;
use super::router::RequestRouter;

pub struct CollaborationController {
    router: Arc<RequestRouter>,
    registry: Arc<CapabilityRegistry>,
}

impl CollaborationController {
    pub fn new(router: Arc<RequestRouter>, registry: Arc<CapabilityRegistry>) -> Self {
        Self { router, registry }
    }

    pub async fn dispatch_multi(
        &self,
        request: &Request,
    ) -> Result<CollaborationOutcome, DispatchError> {
        let started = Instant::now();
        let session_id = SessionId::from(request.id);

        // Duplicate declarations collapse to one sub-dispatch so a repeated
        // capability cannot clobber its own result or inflate the fan-out.
        let mut capabilities: Vec<Capability> = Vec::new();
        for capability in &request.capabilities {
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }

        if capabilities.is_empty() {
            return Err(DispatchError::CapabilityMismatch(Capability::unknown()));
        }

        let session_budget = request.remaining();
        if session_budget.is_zero() {
            return Err(DispatchError::Timeout {
                capability: capabilities[0].clone(),
                elapsed_ms: 0,
            });
        }
        // Divided, not duplicated: each sub-request gets an even slice of
        // what is left.
        let slice = session_budget / capabilities.len() as u32;

        debug!(
            "Session {} fanning out to {} capabilities ({:?} each)",
            session_id,
            capabilities.len(),
            slice
        );

        let cancel = CancellationToken::new();
        let mut join_set: JoinSet<(Capability, Result<DispatchResult, DispatchError>)> =
            JoinSet::new();

        for capability in &capabilities {
            let sub = request.sub_request(capability.clone(), slice);
            let router = Arc::clone(&self.router);
            let capability = capability.clone();
            let token = cancel.child_token();
            join_set.spawn(async move {
                let result = router.dispatch_cancellable(&sub, &token).await;
                (capability, result)
            });
        }

        let mut outcomes: HashMap<Capability, Result<DispatchResult, DispatchError>> =
            HashMap::new();
        loop {
            let remaining = request.remaining();
            if remaining.is_zero() {
                // Session deadline: stop waiting, best-effort cancel the
                // rest. Late results are discarded.
                warn!("Session {} deadline elapsed, cancelling stragglers", session_id);
                cancel.cancel();
                join_set.abort_all();
                break;
            }
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((capability, result)))) => {
                    outcomes.insert(capability, result);
                }
                Ok(Some(Err(join_error))) => {
                    warn!("Sub-dispatch task failed: {}", join_error);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("Session {} deadline elapsed, cancelling stragglers", session_id);
                    cancel.cancel();
                    join_set.abort_all();
                    break;
                }
            }
        }

        let mut completed: Vec<DispatchResult> = Vec::new();
        let mut missing: Vec<Capability> = Vec::new();
        for capability in &capabilities {
            match outcomes.remove(capability) {
                Some(Ok(result)) => completed.push(result),
                Some(Err(error)) => {
                    debug!(
                        "Session {} sub-dispatch for '{}' failed: {}",
                        session_id, capability, error
                    );
                    missing.push(capability.clone());
                }
                None => missing.push(capability.clone()),
            }
        }

        if completed.is_empty() {
            // Only total failure is fatal; any partial success returns.
            return Err(DispatchError::CollaborationConflict(format!(
                "no sub-request succeeded before the session deadline ({} capabilities)",
                capabilities.len()
            )));
        }

        let sub_results: Vec<SubResult> = completed
            .iter()
            .map(|result| SubResult {
                capability: result.capability.clone(),
                worker_id: result.worker_id.unwrap_or_default(),
                worker_capability_count: result
                    .worker_id
                    .and_then(|id| self.registry.descriptor(&id))
                    .map(|descriptor| descriptor.capabilities.len())
                    // Breaker fallbacks carry no guidance; never let them
                    // win a specificity tie-break.
                    .unwrap_or(usize::MAX),
                payload: result.payload.clone().unwrap_or(serde_json::Value::Null),
                guidance: result.guidance.clone(),
            })
            .collect();

        let resolution = resolve(&sub_results);
        let elapsed = started.elapsed();

        info!(
            "Session {} closed: {} completed, {} missing, {} unresolved conflicts in {:?}",
            session_id,
            completed.len(),
            missing.len(),
            resolution.unresolved.len(),
            elapsed
        );
        metrics::counter!(
            "guidepost_collaboration_sessions_total",
            "outcome" => if missing.is_empty() { "complete" } else { "partial" }
        )
        .increment(1);

        Ok(CollaborationOutcome {
            session_id,
            completed,
            resolution,
            missing,
            elapsed_ms: elapsed.as_millis() as u64,
            component: Component::Collaboration,
        })
    }
}
