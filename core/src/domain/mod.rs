// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

pub mod capability;
pub mod dependency;
pub mod errors;
pub mod events;
pub mod request;
pub mod resolution;
pub mod session;
pub mod worker;
