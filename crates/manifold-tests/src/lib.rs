// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # manifold-tests
//!
//! Shared fixtures for cross-crate integration tests. The actual test
//! scenarios live under `tests/`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;

use manifold_core::storage::{MemoryStorage, Storage};
use manifold_core::types::{
    BuiltinKind, ConnectionKind, ConnectionRecord, Endianness, FieldType, Parser, ParserField,
};
use manifold_manager::ConnectionManager;

// =============================================================================
// Backend Harness
// =============================================================================

/// An in-memory backend: memory storage plus a connection manager.
pub struct TestBackend {
    /// The storage shared with the manager.
    pub storage: Arc<MemoryStorage>,
    /// The manager under test.
    pub manager: ConnectionManager,
}

impl TestBackend {
    /// Builds a backend with default manager tunables.
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let manager = ConnectionManager::new(storage.clone() as Arc<dyn Storage>);
        Self { storage, manager }
    }

    /// Creates and starts a mock TCP connection, returning its id.
    pub async fn mock_tcp_connection(&self) -> String {
        let id = self
            .manager
            .create(mock_tcp_record())
            .await
            .expect("create mock tcp connection");
        self.manager.start(&id).await.expect("start mock connection");
        id
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Record Builders
// =============================================================================

/// A mock-transport TCP connection record.
pub fn mock_tcp_record() -> ConnectionRecord {
    ConnectionRecord::new(
        "sess-1",
        ConnectionKind::ModbusTcp,
        "bench-plc",
        serde_json::json!({"host": "mock", "port": 502, "timeout": 2, "mock": true}),
    )
}

/// A mock-transport RTU connection record.
pub fn mock_rtu_record() -> ConnectionRecord {
    ConnectionRecord::new(
        "sess-1",
        ConnectionKind::ModbusRtu,
        "bench-meter",
        serde_json::json!({"port": "/dev/null", "timeout": 500, "mock": true}),
    )
}

// =============================================================================
// Parser Builders
// =============================================================================

/// A fielded parser reading one little-endian float32 with a transform.
pub fn scaled_float_parser() -> Parser {
    Parser::fielded(
        "p-flow",
        "scaled flow",
        vec![ParserField::new("flow", "dev-1", FieldType::Float32, 0)
            .with_endianness(Endianness::Little)
            .with_scale(2.0)
            .with_value_offset(1.0)],
    )
}

/// An `ascii_3_floats` builtin parser.
pub fn ascii_floats_parser() -> Parser {
    Parser::builtin(
        "p-level",
        "tank level",
        BuiltinKind::Ascii3Floats,
        vec![ParserField::new("level", "dev-1", FieldType::Float64, 0)],
    )
}

/// A `raw_bytes` builtin parser.
pub fn raw_bytes_parser() -> Parser {
    Parser::builtin(
        "p-raw",
        "raw dump",
        BuiltinKind::RawBytes,
        vec![ParserField::new("payload", "dev-1", FieldType::RawBytes, 0)],
    )
}
