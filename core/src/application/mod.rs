// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

pub mod collaboration;
pub mod context;
pub mod registry;
pub mod router;
pub mod services;

pub use collaboration::CollaborationController;
pub use context::ContextManager;
pub use registry::{CapabilityRegistry, RegistryError};
pub use router::RequestRouter;
pub use services::CoreServices;
