// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # manifold-core
//!
//! Core abstractions and shared types for the Manifold telemetry backend.
//!
//! This crate provides the foundation used across all Manifold components:
//!
//! - **Types**: persisted records (`ConnectionRecord`, `Parser`, ...) and
//!   [`FieldValue`], the decoded-value sum type
//! - **Error**: the unified error hierarchy rooted at [`ManifoldError`]
//! - **Handler**: the [`ProtocolHandler`] capability trait plus the
//!   factory/registry used by the connection manager
//! - **Metrics**: per-connection monotonic transfer counters
//! - **Retry**: backoff strategies for connect attempts
//! - **Storage**: the persistence collaborator trait and an in-memory
//!   implementation

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod handler;
pub mod metrics;
pub mod retry;
pub mod storage;
pub mod types;

pub use error::{
    ConfigError, ConfigResult, HandlerError, HandlerResult, ManifoldError, ManifoldResult,
    ParseError, ParseResult, StorageError, StorageResult,
};
pub use handler::{HandlerConfig, HandlerFactory, HandlerRegistry, ProtocolHandler};
pub use metrics::{ConnectionMetrics, ConnectionMetricsSnapshot};
pub use retry::{ExponentialBackoff, RetryConfig, RetryStrategy};
pub use storage::{MemoryStorage, Storage};
pub use types::{
    BuiltinKind, ConnectionKind, ConnectionRecord, ConnectionStatus, DataPoint, DeviceData,
    DeviceRecord, Endianness, FieldType, FieldValue, FramingMode, Parser, ParserField, ParserKind,
    SessionRecord, SessionStatus,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
