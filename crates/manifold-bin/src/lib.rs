// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # manifold-bin
//!
//! The `manifold` binary crate: CLI parsing, logging initialization, the
//! bootstrap configuration file, and graceful-shutdown coordination. The
//! heavy lifting lives in `manifold-manager` and below; this crate only
//! wires the process together.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod logging;
pub mod shutdown;
