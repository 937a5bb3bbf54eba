// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0
//! Guidepost dispatch core.
//!
//! Routes guidance requests to a pool of specialized workers, coordinates
//! multi-capability collaboration, and bounds failure propagation with
//! per-dependency circuit breakers and a degraded read-only mode.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::capability::Capability;
pub use domain::errors::DispatchError;
pub use domain::request::{DispatchResult, Priority, Request, RequestId};
pub use domain::session::{CollaborationOutcome, SessionId};
pub use domain::worker::{HealthState, Worker, WorkerDescriptor, WorkerId};
