// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # manifold-manager
//!
//! Connection lifecycle management for the Manifold telemetry backend.
//!
//! The [`ConnectionManager`] owns every live protocol handler: it creates
//! them through the factory registry, connects them with retry and
//! exponential backoff, routes reads through the parser engine, evicts idle
//! connections on a background sweep, and tears everything down on close.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use manifold_core::storage::{MemoryStorage, Storage};
//! use manifold_core::types::{ConnectionKind, ConnectionRecord};
//! use manifold_manager::ConnectionManager;
//!
//! # async fn example() -> Result<(), manifold_manager::ManagerError> {
//! let storage = Arc::new(MemoryStorage::new());
//! let manager = ConnectionManager::new(storage as Arc<dyn Storage>);
//!
//! let record = ConnectionRecord::new(
//!     "sess-1",
//!     ConnectionKind::ModbusTcp,
//!     "line-3 plc",
//!     serde_json::json!({"host": "192.168.1.50", "port": 502, "timeout": 10}),
//! );
//!
//! let id = manager.create(record).await?;
//! manager.start(&id).await?;
//! let data = manager.read_and_parse(&id).await?;
//! manager.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

mod connection;
mod error;
mod manager;

pub use connection::ManagedConnection;
pub use error::{ManagerError, ManagerResult};
pub use manager::{
    ConnectionManager, ManagerConfig, BASE_DELAY, IDLE_SWEEP_INTERVAL, IDLE_TTL, MAX_BACKOFF,
    MAX_RETRIES,
};
