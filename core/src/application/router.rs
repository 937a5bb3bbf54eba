// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Request Router - SLA-Bounded Dispatch with Single Failover
//
// Synchronous from the caller's perspective, internally asynchronous.
// Looks up healthy candidates, issues the call under a deadline of
// min(request budget, capability SLA), and on timeout or worker error
// demotes the failed worker and retries exactly once against the next
// candidate. The retry budget is one extra attempt, to bound tail
// latency.
//
// Dispatches crossing a named external dependency are gated by that
// dependency's breaker: an open breaker short-circuits to the configured
// fallback without consuming the retry budget.

use crate::domain::capability::Capability;
use crate::domain::dependency::DependencyClass;
use crate::domain::errors::DispatchError;
use crate::domain::events::DispatchRecord;
use crate::domain::request::{Component, DispatchResult, DispatchStatus, Request};
use crate::domain::worker::{WorkerFailure, WorkerId};
use crate::infrastructure::breaker::{Admission, BreakerBank, SkippedValidation};
use crate::infrastructure::config::SlaConfig;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::CapabilityRegistry;

/// The single failover retry allowed per request.
const MAX_ATTEMPTS: usize = 2;

enum Gate {
    Unguarded,
    Guarded {
        dependency: String,
        class: DependencyClass,
    },
}

pub struct RequestRouter {
    registry: Arc<CapabilityRegistry>,
    bank: Arc<BreakerBank>,
    bus: EventBus,
    sla: SlaConfig,
    /// capability -> dependency name, resolved once at construction.
    bindings: HashMap<Capability, String>,
}

impl RequestRouter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        bank: Arc<BreakerBank>,
        bus: EventBus,
        sla: SlaConfig,
        bindings: HashMap<Capability, String>,
    ) -> Self {
        Self {
            registry,
            bank,
            bus,
            sla,
            bindings,
        }
    }

    pub async fn dispatch(&self, request: &Request) -> Result<DispatchResult, DispatchError> {
        self.dispatch_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Dispatch with best-effort cancellation. A cancelled token stops the
    /// wait; the in-flight worker call is not guaranteed to stop executing
    /// and any late result is discarded.
    pub async fn dispatch_cancellable(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, DispatchError> {
        let Some(capability) = request.capabilities.first().cloned() else {
            return Err(DispatchError::CapabilityMismatch(Capability::unknown()));
        };

        let started = Instant::now();
        let sla_budget = self.sla.budget_for(&capability);
        let gate = self.gate_for(&capability);

        let candidates = self.registry.candidates_for(&capability);
        if candidates.is_empty() {
            debug!("No candidates for capability '{}'", capability);
            return Err(DispatchError::CapabilityMismatch(capability));
        }

        let mut last_error: Option<DispatchError> = None;

        for (attempt, candidate) in candidates.iter().take(MAX_ATTEMPTS).enumerate() {
            let attempt_no = (attempt + 1) as u8;

            let remaining = request.remaining();
            if remaining.is_zero() {
                let elapsed = started.elapsed();
                last_error = Some(DispatchError::Timeout {
                    capability: capability.clone(),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                break;
            }
            let attempt_budget = remaining.min(sla_budget);

            // Breaker gate, re-checked per attempt: each worker call is
            // one crossing of the dependency.
            let mut peer_skipped = false;
            let mut trial = false;
            if let Gate::Guarded { dependency, class } = &gate {
                match self.bank.try_acquire(dependency) {
                    Admission::Allowed { trial: is_trial } => trial = is_trial,
                    Admission::Rejected => match class {
                        DependencyClass::Peer => {
                            // Peer channel down: continue with local-only
                            // guidance and queue the skipped validation.
                            peer_skipped = true;
                            self.bank.queue_skipped(SkippedValidation {
                                request_id: request.id,
                                capability: capability.clone(),
                                payload: request.payload.clone(),
                                skipped_at: Utc::now(),
                            });
                        }
                        DependencyClass::Backend | DependencyClass::Persistence => {
                            return self.serve_fallback(request, &capability, dependency, started);
                        }
                    },
                }
            }

            let worker_id = candidate.id;
            let Some(worker) = self.registry.worker_handle(&worker_id) else {
                // Deregistered between candidate selection and dispatch.
                // The admitted trial never got a call; free the slot.
                if trial {
                    self.release_gate_trial(&gate);
                }
                continue;
            };
            self.registry.mark_dispatched(&worker_id);

            debug!(
                "Dispatching {} (capability '{}') to worker {} (attempt {}/{}, budget {:?})",
                request.id, capability, worker_id, attempt_no, MAX_ATTEMPTS, attempt_budget
            );

            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    // A cancelled call resolves the trial neither way;
                    // release the slot so the next acquire gets a trial.
                    if trial {
                        self.release_gate_trial(&gate);
                    }
                    let elapsed = attempt_started.elapsed();
                    self.emit_record(request, Some(worker_id), &capability, DispatchStatus::Timeout, attempt_no, elapsed, false, Some("cancelled".to_string()));
                    return Err(DispatchError::Timeout {
                        capability,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                result = tokio::time::timeout(attempt_budget, worker.handle(request)) => result,
            };
            let attempt_elapsed = attempt_started.elapsed();

            match outcome {
                Ok(Ok(reply)) => {
                    if let Gate::Guarded { dependency, class } = &gate {
                        if !peer_skipped {
                            self.bank.record_success(dependency);
                        }
                        if *class == DependencyClass::Backend {
                            self.bank.cache_value(dependency, reply.payload.clone());
                        }
                    }
                    self.emit_record(
                        request,
                        Some(worker_id),
                        &capability,
                        DispatchStatus::Success,
                        attempt_no,
                        attempt_elapsed,
                        false,
                        None,
                    );
                    metrics::histogram!("guidepost_dispatch_latency_ms")
                        .record(attempt_elapsed.as_millis() as f64);

                    let mut result = DispatchResult::success(
                        request.id,
                        worker_id,
                        capability,
                        reply.payload,
                        attempt_elapsed,
                    );
                    result.guidance = reply.guidance;
                    result.peer_validation_skipped = peer_skipped;
                    return Ok(result);
                }
                Ok(Err(failure)) => {
                    warn!(
                        "Worker {} failed request {} (attempt {}): {}",
                        worker_id, request.id, attempt_no, failure
                    );
                    self.registry.mark_degraded(&worker_id);
                    if let Gate::Guarded { dependency, .. } = &gate {
                        if !peer_skipped {
                            self.bank.record_failure(dependency);
                        }
                    }
                    self.emit_record(
                        request,
                        Some(worker_id),
                        &capability,
                        DispatchStatus::Error,
                        attempt_no,
                        attempt_elapsed,
                        false,
                        Some(failure.to_string()),
                    );
                    last_error = Some(DispatchError::WorkerError {
                        capability: capability.clone(),
                        message: worker_failure_message(&failure),
                    });
                }
                Err(_) => {
                    warn!(
                        "Worker {} timed out on request {} after {:?} (attempt {})",
                        worker_id, request.id, attempt_budget, attempt_no
                    );
                    self.registry.mark_degraded(&worker_id);
                    if let Gate::Guarded { dependency, .. } = &gate {
                        if !peer_skipped {
                            self.bank.record_failure(dependency);
                        }
                    }
                    self.emit_record(
                        request,
                        Some(worker_id),
                        &capability,
                        DispatchStatus::Timeout,
                        attempt_no,
                        attempt_elapsed,
                        false,
                        Some("attempt deadline exceeded".to_string()),
                    );
                    last_error = Some(DispatchError::Timeout {
                        capability: capability.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        Err(last_error.unwrap_or(DispatchError::CapabilityMismatch(capability)))
    }

    /// Serve a backend dependency's fallback while its breaker is open:
    /// the last-known cached value flagged stale, or `ServiceDegraded`
    /// when nothing was ever cached.
    fn serve_fallback(
        &self,
        request: &Request,
        capability: &Capability,
        dependency: &str,
        started: Instant,
    ) -> Result<DispatchResult, DispatchError> {
        match self.bank.cached_value(dependency) {
            Some(stale) => {
                let elapsed = started.elapsed();
                info!(
                    "Breaker '{}' open, serving cached value for capability '{}'",
                    dependency, capability
                );
                self.emit_record(
                    request,
                    None,
                    capability,
                    DispatchStatus::Success,
                    1,
                    elapsed,
                    true,
                    None,
                );
                Ok(DispatchResult {
                    request_id: request.id,
                    worker_id: None,
                    capability: capability.clone(),
                    status: DispatchStatus::Success,
                    elapsed_ms: elapsed.as_millis() as u64,
                    component: Component::Breaker,
                    payload: Some(stale.value),
                    guidance: Vec::new(),
                    error: None,
                    stale: true,
                    peer_validation_skipped: false,
                })
            }
            None => {
                self.emit_record(
                    request,
                    None,
                    capability,
                    DispatchStatus::Error,
                    1,
                    started.elapsed(),
                    false,
                    Some(format!("breaker '{}' open, no cached fallback", dependency)),
                );
                Err(DispatchError::ServiceDegraded {
                    dependency: dependency.to_string(),
                })
            }
        }
    }

    fn release_gate_trial(&self, gate: &Gate) {
        if let Gate::Guarded { dependency, .. } = gate {
            self.bank.release_trial(dependency);
        }
    }

    fn gate_for(&self, capability: &Capability) -> Gate {
        match self.bindings.get(capability) {
            Some(dependency) => match self.bank.class_of(dependency) {
                Some(class) => Gate::Guarded {
                    dependency: dependency.clone(),
                    class,
                },
                None => Gate::Unguarded,
            },
            None => Gate::Unguarded,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_record(
        &self,
        request: &Request,
        worker_id: Option<WorkerId>,
        capability: &Capability,
        status: DispatchStatus,
        attempt: u8,
        elapsed: Duration,
        stale: bool,
        error: Option<String>,
    ) {
        metrics::counter!(
            "guidepost_dispatch_total",
            "status" => match status {
                DispatchStatus::Success => "success",
                DispatchStatus::Timeout => "timeout",
                DispatchStatus::Error => "error",
            }
        )
        .increment(1);
        self.bus.publish_dispatch(DispatchRecord {
            request_id: request.id,
            worker_id,
            capability: capability.clone(),
            status,
            attempt,
            elapsed_ms: elapsed.as_millis() as u64,
            stale,
            error,
            at: Utc::now(),
        });
    }
}

fn worker_failure_message(failure: &WorkerFailure) -> String {
    match failure {
        WorkerFailure::Rejected(message) | WorkerFailure::Internal(message) => message.clone(),
    }
}
