// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Storage collaborator interface.
//!
//! The embedded relational store lives outside this workspace; the manager
//! consumes it through the [`Storage`] trait. Each call is durable and
//! transactional on its own, and callers never hold the manager lock across
//! a storage call.
//!
//! [`MemoryStorage`] backs tests and standalone runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::types::{ConnectionRecord, DataPoint, DeviceRecord, Parser, SessionRecord};

// =============================================================================
// Storage Trait
// =============================================================================

/// The persistence surface consumed by the connection manager.
#[async_trait]
pub trait Storage: Send + Sync {
    // =========================================================================
    // Sessions
    // =========================================================================

    /// Persists a session record.
    async fn create_session(&self, session: &SessionRecord) -> StorageResult<()>;

    /// Fetches a session by id.
    async fn get_session(&self, id: &str) -> StorageResult<SessionRecord>;

    /// Lists all sessions.
    async fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>>;

    /// Deletes a session by id.
    async fn delete_session(&self, id: &str) -> StorageResult<()>;

    // =========================================================================
    // Connections
    // =========================================================================

    /// Persists a connection record.
    async fn create_connection(&self, connection: &ConnectionRecord) -> StorageResult<()>;

    /// Fetches a connection by id.
    async fn get_connection(&self, id: &str) -> StorageResult<ConnectionRecord>;

    /// Lists the connections belonging to a session.
    async fn list_connections_by_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ConnectionRecord>>;

    /// Deletes a connection by id.
    async fn delete_connection(&self, id: &str) -> StorageResult<()>;

    // =========================================================================
    // Devices
    // =========================================================================

    /// Persists a device record.
    async fn create_device(&self, device: &DeviceRecord) -> StorageResult<()>;

    /// Fetches a device by id.
    async fn get_device(&self, id: &str) -> StorageResult<DeviceRecord>;

    /// Lists the devices read through a connection.
    async fn list_devices_by_connection(
        &self,
        connection_id: &str,
    ) -> StorageResult<Vec<DeviceRecord>>;

    // =========================================================================
    // Parsers
    // =========================================================================

    /// Persists a parser descriptor.
    async fn create_parser(&self, parser: &Parser) -> StorageResult<()>;

    /// Fetches a parser by id.
    async fn get_parser(&self, id: &str) -> StorageResult<Parser>;

    // =========================================================================
    // Time-series data
    // =========================================================================

    /// Appends decoded samples to the time-series store.
    async fn write_data_points(&self, points: &[DataPoint]) -> StorageResult<()>;
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// In-memory [`Storage`] implementation.
///
/// Table-per-record `RwLock`'d maps. Not durable; meant for tests and
/// standalone runs without the external store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    connections: RwLock<HashMap<String, ConnectionRecord>>,
    devices: RwLock<HashMap<String, DeviceRecord>>,
    parsers: RwLock<HashMap<String, Parser>>,
    data_points: RwLock<Vec<DataPoint>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns the number of buffered data points.
    pub async fn data_point_count(&self) -> usize {
        self.data_points.read().await.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_session(&self, session: &SessionRecord) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<SessionRecord> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("session", id))
    }

    async fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("session", id))
    }

    async fn create_connection(&self, connection: &ConnectionRecord) -> StorageResult<()> {
        self.connections
            .write()
            .await
            .insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> StorageResult<ConnectionRecord> {
        self.connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("connection", id))
    }

    async fn list_connections_by_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ConnectionRecord>> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn delete_connection(&self, id: &str) -> StorageResult<()> {
        self.connections
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("connection", id))
    }

    async fn create_device(&self, device: &DeviceRecord) -> StorageResult<()> {
        self.devices
            .write()
            .await
            .insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn get_device(&self, id: &str) -> StorageResult<DeviceRecord> {
        self.devices
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("device", id))
    }

    async fn list_devices_by_connection(
        &self,
        connection_id: &str,
    ) -> StorageResult<Vec<DeviceRecord>> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.connection_id == connection_id)
            .cloned()
            .collect())
    }

    async fn create_parser(&self, parser: &Parser) -> StorageResult<()> {
        self.parsers
            .write()
            .await
            .insert(parser.id.clone(), parser.clone());
        Ok(())
    }

    async fn get_parser(&self, id: &str) -> StorageResult<Parser> {
        self.parsers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("parser", id))
    }

    async fn write_data_points(&self, points: &[DataPoint]) -> StorageResult<()> {
        self.data_points.write().await.extend_from_slice(points);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionKind, FieldValue};
    use chrono::Utc;

    fn sample_connection(id: &str) -> ConnectionRecord {
        let mut record = ConnectionRecord::new(
            "sess-1",
            ConnectionKind::ModbusTcp,
            "plc",
            serde_json::json!({"host": "127.0.0.1", "port": 1502}),
        );
        record.id = id.to_string();
        record
    }

    #[tokio::test]
    async fn test_connection_crud() {
        let storage = MemoryStorage::new();
        let record = sample_connection("c-1");

        storage.create_connection(&record).await.unwrap();
        assert_eq!(storage.connection_count().await, 1);

        let fetched = storage.get_connection("c-1").await.unwrap();
        assert_eq!(fetched, record);

        storage.delete_connection("c-1").await.unwrap();
        let err = storage.get_connection("c-1").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_connection() {
        let storage = MemoryStorage::new();
        let err = storage.delete_connection("nope").await.unwrap_err();
        assert_eq!(err.error_type(), "not_found");
    }

    #[tokio::test]
    async fn test_list_by_session() {
        let storage = MemoryStorage::new();
        storage
            .create_connection(&sample_connection("c-1"))
            .await
            .unwrap();
        storage
            .create_connection(&sample_connection("c-2"))
            .await
            .unwrap();

        let mut other = sample_connection("c-3");
        other.session_id = "sess-2".to_string();
        storage.create_connection(&other).await.unwrap();

        let listed = storage.list_connections_by_session("sess-1").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_parser_round_trip() {
        let storage = MemoryStorage::new();
        let parser = Parser::fielded("p-1", "meter fields", vec![]);

        storage.create_parser(&parser).await.unwrap();
        let fetched = storage.get_parser("p-1").await.unwrap();
        assert_eq!(fetched.name, "meter fields");

        let err = storage.get_parser("p-2").await.unwrap_err();
        assert!(err.to_string().contains("parser not found"));
    }

    #[tokio::test]
    async fn test_data_points_append() {
        let storage = MemoryStorage::new();
        let point = DataPoint {
            id: "dp-1".into(),
            device_id: "dev-1".into(),
            parser_id: None,
            timestamp: Utc::now().timestamp_millis(),
            value: FieldValue::Float(21.5),
        };

        storage.write_data_points(&[point]).await.unwrap();
        assert_eq!(storage.data_point_count().await, 1);
    }
}
