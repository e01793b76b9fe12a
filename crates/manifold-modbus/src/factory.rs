// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Handler factories for the two Modbus protocol kinds.
//!
//! Each factory owns the deserialization of its protocol-specific config
//! blob and reports `InvalidConfig` on failure; the connection manager
//! registers both at construction.

use tokio_util::sync::CancellationToken;

use manifold_core::error::{HandlerError, HandlerResult};
use manifold_core::handler::{HandlerConfig, HandlerFactory, ProtocolHandler};
use manifold_core::types::ConnectionKind;

use crate::rtu::ModbusRtuHandler;
use crate::tcp::ModbusTcpHandler;
use crate::types::{ModbusRtuConfig, ModbusTcpConfig};

// =============================================================================
// TcpHandlerFactory
// =============================================================================

/// Builds [`ModbusTcpHandler`]s from `modbus_tcp` connection records.
#[derive(Debug, Default)]
pub struct TcpHandlerFactory;

impl TcpHandlerFactory {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }
}

impl HandlerFactory for TcpHandlerFactory {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::ModbusTcp
    }

    fn create(
        &self,
        config: &HandlerConfig,
        cancel: CancellationToken,
    ) -> HandlerResult<Box<dyn ProtocolHandler>> {
        let modbus_config: ModbusTcpConfig = serde_json::from_value(config.config.clone())
            .map_err(|e| {
                HandlerError::invalid_config(format!("invalid Modbus TCP config: {}", e))
            })?;

        let handler = ModbusTcpHandler::new(config.name.clone(), modbus_config, cancel)?;
        Ok(Box::new(handler))
    }
}

// =============================================================================
// RtuHandlerFactory
// =============================================================================

/// Builds [`ModbusRtuHandler`]s from `modbus_rtu` connection records.
#[derive(Debug, Default)]
pub struct RtuHandlerFactory;

impl RtuHandlerFactory {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }
}

impl HandlerFactory for RtuHandlerFactory {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::ModbusRtu
    }

    fn create(
        &self,
        config: &HandlerConfig,
        cancel: CancellationToken,
    ) -> HandlerResult<Box<dyn ProtocolHandler>> {
        let modbus_config: ModbusRtuConfig = serde_json::from_value(config.config.clone())
            .map_err(|e| {
                HandlerError::invalid_config(format!("invalid Modbus RTU config: {}", e))
            })?;

        let handler = ModbusRtuHandler::new(config.name.clone(), modbus_config, cancel)?;
        Ok(Box::new(handler))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_config(kind: ConnectionKind, blob: serde_json::Value) -> HandlerConfig {
        HandlerConfig::new("c-1", "s-1", kind, "test", blob)
    }

    #[test]
    fn test_tcp_factory_accepts_envelope() {
        let factory = TcpHandlerFactory::new();
        assert_eq!(factory.kind(), ConnectionKind::ModbusTcp);

        let config = handler_config(
            ConnectionKind::ModbusTcp,
            serde_json::json!({"host": "10.0.0.7", "port": 502, "timeout": 5}),
        );
        let handler = factory.create(&config, CancellationToken::new()).unwrap();
        assert_eq!(handler.kind(), ConnectionKind::ModbusTcp);
        assert_eq!(handler.name(), "test");
        assert!(!handler.is_connected());
    }

    #[test]
    fn test_tcp_factory_rejects_malformed_blob() {
        let factory = TcpHandlerFactory::new();
        let config = handler_config(
            ConnectionKind::ModbusTcp,
            serde_json::json!({"port": "not-a-number"}),
        );

        let err = factory
            .create(&config, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidConfig { .. }));
    }

    #[test]
    fn test_rtu_factory_accepts_envelope() {
        let factory = RtuHandlerFactory::new();
        let config = handler_config(
            ConnectionKind::ModbusRtu,
            serde_json::json!({
                "port": "/dev/ttyUSB0",
                "baud_rate": 19200,
                "parity": "E",
                "timeout": 750
            }),
        );

        let handler = factory.create(&config, CancellationToken::new()).unwrap();
        assert_eq!(handler.kind(), ConnectionKind::ModbusRtu);
    }

    #[test]
    fn test_rtu_factory_rejects_invalid_settings() {
        let factory = RtuHandlerFactory::new();
        let config = handler_config(
            ConnectionKind::ModbusRtu,
            serde_json::json!({"port": "/dev/ttyUSB0", "data_bits": 12}),
        );

        let err = factory
            .create(&config, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidConfig { .. }));
    }
}
