// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

pub mod api;

pub use api::app;
