// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol handler abstraction layer.
//!
//! A [`ProtocolHandler`] wraps one transport-level connection to a field
//! device or bus. The connection manager drives handlers exclusively through
//! this capability set; protocol-specific typed operations live on the
//! concrete handler types.
//!
//! # Lifecycle
//!
//! 1. A [`HandlerFactory`] builds the handler from its config blob (no I/O).
//! 2. `connect()` establishes the transport.
//! 3. `read_raw()` / `write_raw()` move bytes; typed operations run on the
//!    concrete type.
//! 4. `disconnect()` releases the transport (idempotent).

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, HandlerResult};
use crate::metrics::ConnectionMetricsSnapshot;
use crate::types::ConnectionKind;

// =============================================================================
// ProtocolHandler Trait
// =============================================================================

/// The capability set every protocol handler exposes to the manager.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync`; all methods take `&self` and guard the
/// transport with interior locking. Handlers serialize transactions on the
/// transport lock, so concurrent callers queue rather than interleave frames.
#[async_trait]
pub trait ProtocolHandler: Send + Sync + std::fmt::Debug {
    /// Returns the handler's display name.
    fn name(&self) -> &str;

    /// Returns the protocol kind.
    fn kind(&self) -> ConnectionKind;

    /// Establishes the transport.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Transport`] if the dial/open fails
    /// - [`HandlerError::Protocol`] if already connected
    async fn connect(&self) -> HandlerResult<()>;

    /// Closes the transport. Idempotent: disconnecting a disconnected handler
    /// succeeds.
    async fn disconnect(&self) -> HandlerResult<()>;

    /// Returns `true` if the handler holds a live transport.
    fn is_connected(&self) -> bool;

    /// Reads whatever bytes the device has pending, bounded by the configured
    /// per-request timeout.
    async fn read_raw(&self) -> HandlerResult<Vec<u8>>;

    /// Writes raw bytes to the transport.
    async fn write_raw(&self, data: &[u8]) -> HandlerResult<()>;

    /// Returns a snapshot of the connection metrics.
    fn metrics(&self) -> ConnectionMetricsSnapshot;
}

// =============================================================================
// Handler Configuration
// =============================================================================

/// Configuration handed to a [`HandlerFactory`].
///
/// `config` is the protocol-specific blob from the connection record; the
/// factory owns its deserialization and reports
/// [`HandlerError::InvalidConfig`] on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Connection id.
    pub id: String,
    /// Owning session id.
    pub session_id: String,
    /// Protocol kind.
    pub kind: ConnectionKind,
    /// Human-readable name.
    pub name: String,
    /// Protocol-specific configuration blob.
    pub config: serde_json::Value,
}

impl HandlerConfig {
    /// Creates a handler config.
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        kind: ConnectionKind,
        name: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            kind,
            name: name.into(),
            config,
        }
    }
}

// =============================================================================
// Handler Factory & Registry
// =============================================================================

/// Builds handlers for one protocol kind.
pub trait HandlerFactory: Send + Sync {
    /// The protocol kind this factory serves.
    fn kind(&self) -> ConnectionKind;

    /// Builds a handler from the config blob. Construction performs no I/O;
    /// the transport is established by `connect()`.
    ///
    /// The `cancel` token is a child of the manager's root token; in-flight
    /// I/O aborts with [`HandlerError::Cancelled`] when it fires.
    fn create(
        &self,
        config: &HandlerConfig,
        cancel: CancellationToken,
    ) -> HandlerResult<Box<dyn ProtocolHandler>>;
}

/// Maps protocol kinds to their factories.
pub struct HandlerRegistry {
    factories: HashMap<ConnectionKind, Box<dyn HandlerFactory>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory, replacing any existing one for the same kind.
    pub fn register(&mut self, factory: Box<dyn HandlerFactory>) {
        let kind = factory.kind();
        self.factories.insert(kind, factory);
        tracing::debug!(kind = %kind, "Registered handler factory");
    }

    /// Builds a handler for the config's kind.
    ///
    /// # Errors
    ///
    /// [`HandlerError::InvalidConfig`] naming the kind when no factory is
    /// registered; otherwise whatever the factory reports.
    pub fn create(
        &self,
        config: &HandlerConfig,
        cancel: CancellationToken,
    ) -> HandlerResult<Box<dyn ProtocolHandler>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            HandlerError::invalid_config(format!(
                "no handler factory registered for protocol '{}'",
                config.kind
            ))
        })?;

        factory.create(config, cancel)
    }

    /// Returns `true` if a factory is registered for the given kind.
    pub fn supports(&self, kind: ConnectionKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Returns the registered kinds.
    pub fn kinds(&self) -> Vec<ConnectionKind> {
        self.factories.keys().copied().collect()
    }

    /// Returns the number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if no factories are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ConnectionMetrics;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct NullHandler {
        name: String,
        connected: AtomicBool,
        metrics: Arc<ConnectionMetrics>,
    }

    #[async_trait]
    impl ProtocolHandler for NullHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ConnectionKind {
            ConnectionKind::ModbusTcp
        }

        async fn connect(&self) -> HandlerResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> HandlerResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn read_raw(&self) -> HandlerResult<Vec<u8>> {
            if !self.is_connected() {
                return Err(HandlerError::NotConnected);
            }
            Ok(vec![0xAB])
        }

        async fn write_raw(&self, _data: &[u8]) -> HandlerResult<()> {
            if !self.is_connected() {
                return Err(HandlerError::NotConnected);
            }
            Ok(())
        }

        fn metrics(&self) -> ConnectionMetricsSnapshot {
            self.metrics.snapshot()
        }
    }

    struct NullFactory;

    impl HandlerFactory for NullFactory {
        fn kind(&self) -> ConnectionKind {
            ConnectionKind::ModbusTcp
        }

        fn create(
            &self,
            config: &HandlerConfig,
            _cancel: CancellationToken,
        ) -> HandlerResult<Box<dyn ProtocolHandler>> {
            Ok(Box::new(NullHandler {
                name: config.name.clone(),
                connected: AtomicBool::new(false),
                metrics: Arc::new(ConnectionMetrics::new()),
            }))
        }
    }

    #[tokio::test]
    async fn test_registry_creates_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(NullFactory));

        assert!(registry.supports(ConnectionKind::ModbusTcp));
        assert!(!registry.supports(ConnectionKind::ModbusRtu));
        assert_eq!(registry.len(), 1);

        let config = HandlerConfig::new(
            "c-1",
            "s-1",
            ConnectionKind::ModbusTcp,
            "bench plc",
            serde_json::json!({}),
        );

        let handler = registry
            .create(&config, CancellationToken::new())
            .unwrap();
        assert_eq!(handler.name(), "bench plc");
        assert!(!handler.is_connected());

        handler.connect().await.unwrap();
        assert!(handler.is_connected());
        assert_eq!(handler.read_raw().await.unwrap(), vec![0xAB]);
    }

    #[tokio::test]
    async fn test_registry_unknown_kind() {
        let registry = HandlerRegistry::new();
        let config = HandlerConfig::new(
            "c-1",
            "s-1",
            ConnectionKind::ModbusRtu,
            "meter",
            serde_json::json!({}),
        );

        let err = registry
            .create(&config, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidConfig { .. }));
        assert!(err.to_string().contains("modbus_rtu"));
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let handler = NullHandler {
            name: "h".into(),
            connected: AtomicBool::new(false),
            metrics: Arc::new(ConnectionMetrics::new()),
        };

        let result = handler.read_raw().await;
        assert!(matches!(result, Err(HandlerError::NotConnected)));
    }
}
