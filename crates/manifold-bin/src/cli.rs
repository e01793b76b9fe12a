// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Manifold - industrial telemetry backend for Modbus field devices.
#[derive(Parser, Debug)]
#[command(
    name = "manifold",
    author = "Sylvex <contact@sylvex.io>",
    version = manifold_core::VERSION,
    about = "Industrial telemetry backend for Modbus TCP/RTU field devices",
    propagate_version = true
)]
pub struct Cli {
    /// Bootstrap configuration file path.
    #[arg(
        short,
        long,
        default_value = "manifold.yaml",
        env = "MANIFOLD_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(
        short,
        long,
        default_value = "info",
        env = "MANIFOLD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log output format.
    #[arg(long, default_value = "text", env = "MANIFOLD_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Subcommand to execute; defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the backend (default).
    Run,
    /// Validate the bootstrap configuration file and exit.
    Validate,
    /// Print version information and exit.
    Version,
}

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text (default).
    Text,
    /// JSON lines for log aggregation.
    Json,
    /// Minimal single-line output.
    Compact,
}

// =============================================================================
// Tests
// =============================================================================
