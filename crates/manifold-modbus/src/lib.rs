// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # manifold-modbus
//!
//! Modbus TCP/RTU protocol engine for the Manifold telemetry backend.
//!
//! The system is strictly a Modbus *client* (master). This crate provides:
//!
//! - **Framing** ([`frame`]): MBAP headers, RTU frames, CRC-16, exception
//!   decoding - pure functions, bit-exact
//! - **PDUs** ([`pdu`]): request builders and response parsers for function
//!   codes 0x01-0x06, 0x0F, 0x10, 0x16, and 0x17
//! - **Transports** ([`transport`]): TCP sockets, serial ports, and a
//!   deterministic in-memory mock, all behind [`ByteTransport`] with
//!   deadline-based timeouts
//! - **Handlers** ([`tcp`], [`rtu`]): per-connection protocol handlers
//!   implementing `manifold_core::ProtocolHandler` plus the typed operation
//!   set
//! - **Factories** ([`factory`]): config-blob-driven construction for the
//!   connection manager's registry
//!
//! ## Wire format
//!
//! All 16-bit register/address/quantity fields are big-endian on the wire
//! except the RTU trailing CRC, which is little-endian. Packed-bit responses
//! order bits LSB-first within each byte, starting from the first requested
//! coil.
//!
//! ## Example
//!
//! ```rust,no_run
//! use manifold_modbus::tcp::ModbusTcpHandler;
//! use manifold_modbus::types::ModbusTcpConfig;
//! use manifold_core::handler::ProtocolHandler;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> manifold_core::error::HandlerResult<()> {
//! let config = ModbusTcpConfig::new("192.168.1.50", 502).with_unit_id(1);
//! let handler = ModbusTcpHandler::new("plc-01", config, CancellationToken::new())?;
//!
//! handler.connect().await?;
//! let registers = handler.read_holding_registers(1, 0, 10).await?;
//! handler.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod factory;
pub mod frame;
pub mod pdu;
pub mod rtu;
pub mod tcp;
pub mod transport;
pub mod types;

pub use factory::{RtuHandlerFactory, TcpHandlerFactory};
pub use frame::{crc16, validate_crc, MbapHeader};
pub use rtu::ModbusRtuHandler;
pub use tcp::ModbusTcpHandler;
pub use transport::{ByteTransport, MockHandle, MockTransport, SerialTransport, TcpTransport};
pub use types::{ModbusRtuConfig, ModbusTcpConfig, Parity};
