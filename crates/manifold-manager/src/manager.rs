// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The connection manager.
//!
//! Owns the map of managed connections, the handler factory registry, the
//! parser engine, and a background idle-sweep task. A single readers-writer
//! lock guards the map: lookups take it shared, create/remove/sweep take it
//! exclusive. The manager never holds the lock across a storage call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use manifold_core::handler::{HandlerConfig, HandlerFactory, HandlerRegistry};
use manifold_core::metrics::ConnectionMetricsSnapshot;
use manifold_core::retry::{ExponentialBackoff, RetryStrategy};
use manifold_core::storage::Storage;
use manifold_core::types::{
    ConnectionRecord, ConnectionStatus, DeviceData, FieldValue, Parser,
};
use manifold_modbus::factory::{RtuHandlerFactory, TcpHandlerFactory};
use manifold_parser::Engine;

use crate::connection::ManagedConnection;
use crate::error::{ManagerError, ManagerResult};

/// Connect attempts per `start` call.
pub const MAX_RETRIES: u32 = 3;

/// Backoff base delay between connect attempts.
pub const BASE_DELAY: Duration = Duration::from_secs(2);

/// Cap on the computed backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Idle age beyond which a connection is evicted from the map.
pub const IDLE_TTL: Duration = Duration::from_secs(600);

/// Period of the background idle sweep.
pub const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

type ConnectionMap = HashMap<String, Arc<ManagedConnection>>;

// =============================================================================
// ManagerConfig
// =============================================================================

/// Tunables for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Connect attempts per `start` call.
    pub max_retries: u32,
    /// Delay strategy between connect attempts.
    pub retry: RetryStrategy,
    /// Idle age beyond which connections are evicted.
    pub idle_ttl: Duration,
    /// Period of the background idle sweep.
    pub sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry: RetryStrategy::Exponential(ExponentialBackoff::new(BASE_DELAY, MAX_BACKOFF)),
            idle_ttl: IDLE_TTL,
            sweep_interval: IDLE_SWEEP_INTERVAL,
        }
    }
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Lifecycle owner for all protocol handlers.
///
/// Construction registers the `modbus_tcp` and `modbus_rtu` factories and
/// spawns the idle sweeper; [`close`](Self::close) halts the sweeper and
/// disconnects everything.
pub struct ConnectionManager {
    connections: Arc<RwLock<ConnectionMap>>,
    registry: std::sync::RwLock<HandlerRegistry>,
    storage: Arc<dyn Storage>,
    engine: Engine,
    config: ManagerConfig,
    cancel: CancellationToken,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Creates a manager with default tunables.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_config(storage, ManagerConfig::default())
    }

    /// Creates a manager with explicit tunables.
    pub fn with_config(storage: Arc<dyn Storage>, config: ManagerConfig) -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(TcpHandlerFactory::new()));
        registry.register(Box::new(RtuHandlerFactory::new()));

        let connections: Arc<RwLock<ConnectionMap>> = Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let sweeper = Self::spawn_sweeper(
            Arc::clone(&connections),
            cancel.child_token(),
            config.sweep_interval,
            config.idle_ttl,
        );

        Self {
            connections,
            registry: std::sync::RwLock::new(registry),
            storage,
            engine: Engine::new(),
            config,
            cancel,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        }
    }

    /// Registers (or replaces) a handler factory.
    pub fn register_factory(&self, factory: Box<dyn HandlerFactory>) {
        self.registry.write().unwrap().register(factory);
    }

    fn spawn_sweeper(
        connections: Arc<RwLock<ConnectionMap>>,
        token: CancellationToken,
        interval: Duration,
        ttl: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so sweeps start one
            // full interval after boot.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        Self::evict_idle(&connections, ttl).await;
                    }
                }
            }
        })
    }

    /// Evicts connections idle longer than `ttl`. Disconnect errors are
    /// swallowed; eviction is a runtime concern and never touches storage.
    async fn evict_idle(connections: &RwLock<ConnectionMap>, ttl: Duration) {
        let now = Instant::now();

        let evicted: Vec<Arc<ManagedConnection>> = {
            let mut map = connections.write().await;
            let stale: Vec<String> = map
                .iter()
                .filter(|(_, conn)| conn.idle_for(now) > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| map.remove(&id))
                .collect()
        };

        for conn in evicted {
            let idle = conn.idle_for(now);
            tracing::info!(
                connection = %conn.id(),
                idle_secs = idle.as_secs(),
                "Evicting idle connection"
            );
            if let Err(err) = conn.handler().disconnect().await {
                tracing::warn!(
                    connection = %conn.id(),
                    error = %err,
                    "Error disconnecting idle connection"
                );
            }
        }
    }

    /// Runs one idle sweep immediately.
    pub async fn sweep_idle_once(&self) {
        Self::evict_idle(&self.connections, self.config.idle_ttl).await;
    }

    async fn lookup(&self, id: &str) -> ManagerResult<Arc<ManagedConnection>> {
        self.connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::not_found(id))
    }

    // =========================================================================
    // Lifecycle Operations
    // =========================================================================

    /// Creates a managed connection from a descriptor: assigns a fresh id,
    /// persists the record, loads the attached parser, and builds (but does
    /// not connect) the handler.
    ///
    /// Returns the assigned connection id.
    pub async fn create(&self, mut record: ConnectionRecord) -> ManagerResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        record.id = id.clone();

        self.storage.create_connection(&record).await?;

        let parser: Option<Parser> = match &record.parser_id {
            Some(parser_id) => Some(self.storage.get_parser(parser_id).await?),
            None => None,
        };

        let handler = {
            let registry = self.registry.read().unwrap();
            if !registry.supports(record.kind) {
                return Err(ManagerError::unknown_protocol(record.kind.as_str()));
            }

            let handler_config = HandlerConfig::new(
                record.id.clone(),
                record.session_id.clone(),
                record.kind,
                record.name.clone(),
                record.config.clone(),
            );
            registry.create(&handler_config, self.cancel.child_token())?
        };

        let managed = Arc::new(ManagedConnection::new(handler, record, parser));
        self.connections.write().await.insert(id.clone(), managed);

        tracing::info!(connection = %id, "Connection created");
        Ok(id)
    }

    /// Connects a managed connection, retrying transient failures with
    /// exponential backoff (no sleep after the final attempt).
    pub async fn start(&self, id: &str) -> ManagerResult<()> {
        let conn = self.lookup(id).await?;
        conn.set_status(ConnectionStatus::Connecting);

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            match conn.handler().connect().await {
                Ok(()) => {
                    conn.touch();
                    conn.set_status(ConnectionStatus::Connected);
                    tracing::info!(connection = %id, "Connection started");
                    return Ok(());
                }
                Err(err) => {
                    if !err.is_retryable() {
                        conn.set_error(&err);
                        return Err(err.into());
                    }

                    if attempt + 1 < self.config.max_retries {
                        let delay = self.config.retry.delay(attempt);
                        tracing::warn!(
                            connection = %id,
                            error = %err,
                            retry = attempt + 1,
                            delay_secs = delay.as_secs_f64(),
                            "Connect failed, retrying"
                        );
                        conn.bump_retries();
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.expect("at least one connect attempt");
        conn.set_error(&err);
        tracing::error!(
            connection = %id,
            attempts = self.config.max_retries,
            error = %err,
            "Connection failed to start"
        );
        Err(err.into())
    }

    /// Disconnects a managed connection. Idempotent; unknown ids succeed.
    pub async fn stop(&self, id: &str) -> ManagerResult<()> {
        let conn = match self.lookup(id).await {
            Ok(conn) => conn,
            Err(_) => return Ok(()),
        };

        conn.handler().disconnect().await?;
        conn.touch();
        conn.set_status(ConnectionStatus::Disconnected);

        tracing::info!(connection = %id, "Connection stopped");
        Ok(())
    }

    /// Disconnects a connection, drops it from the map, and deletes its
    /// record from storage.
    pub async fn remove(&self, id: &str) -> ManagerResult<()> {
        let conn = match self.lookup(id).await {
            Ok(conn) => conn,
            Err(_) => return Ok(()),
        };

        conn.handler().disconnect().await?;
        self.connections.write().await.remove(id);
        self.storage.delete_connection(id).await?;

        tracing::info!(connection = %id, "Connection removed");
        Ok(())
    }

    // =========================================================================
    // Data Path
    // =========================================================================

    /// Reads pending bytes from the connection and decodes them with the
    /// attached parser. Without a parser the bytes come back under
    /// `{"raw": {"data": <lossy utf-8>}}`.
    pub async fn read_and_parse(&self, id: &str) -> ManagerResult<DeviceData> {
        let conn = self.lookup(id).await?;

        let data = conn.handler().read_raw().await?;
        conn.touch();

        match conn.parser() {
            Some(parser) => Ok(self.engine.parse(parser, &data)?),
            None => {
                let mut fields = HashMap::new();
                fields.insert(
                    "data".to_string(),
                    FieldValue::Text(String::from_utf8_lossy(&data).into_owned()),
                );
                let mut result = HashMap::new();
                result.insert("raw".to_string(), fields);
                Ok(result)
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns the managed connection wrapper for direct handler access.
    pub async fn get(&self, id: &str) -> ManagerResult<Arc<ManagedConnection>> {
        self.lookup(id).await
    }

    /// Returns a connection's metrics snapshot.
    pub async fn metrics(&self, id: &str) -> ManagerResult<ConnectionMetricsSnapshot> {
        Ok(self.lookup(id).await?.handler().metrics())
    }

    /// Lists all managed connection records with live status.
    pub async fn list(&self) -> Vec<ConnectionRecord> {
        self.connections
            .read()
            .await
            .values()
            .map(|conn| conn.record())
            .collect()
    }

    /// Number of managed connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connections are managed.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Halts the sweeper, disconnects every handler, and clears the map.
    /// Disconnection errors are aggregated rather than short-circuiting.
    pub async fn close(&self) -> ManagerResult<()> {
        self.cancel.cancel();

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.await.ok();
        }

        let drained: Vec<Arc<ManagedConnection>> = {
            let mut map = self.connections.write().await;
            map.drain().map(|(_, conn)| conn).collect()
        };

        let mut errors = Vec::new();
        for conn in drained {
            if let Err(err) = conn.handler().disconnect().await {
                errors.push(format!("connection '{}': {}", conn.id(), err));
            }
        }

        tracing::info!(errors = errors.len(), "Connection manager closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Shutdown { errors })
        }
    }

    #[cfg(test)]
    pub(crate) fn clear_factories(&self) {
        *self.registry.write().unwrap() = HandlerRegistry::new();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registry", &self.registry.read().unwrap())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
