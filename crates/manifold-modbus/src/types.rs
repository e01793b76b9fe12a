// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration types for the Modbus handlers.
//!
//! These structs are the deserialized form of the opaque config blob carried
//! by a connection record. Wire field names and units follow the envelope
//! contract: TCP timeouts are seconds, RTU timeouts are milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use manifold_core::error::{HandlerError, HandlerResult};

/// Default per-request timeout for TCP connections.
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-request timeout for RTU connections.
pub const DEFAULT_RTU_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default unit (slave) id.
pub const DEFAULT_UNIT_ID: u8 = 1;

// =============================================================================
// Parity
// =============================================================================

/// Serial parity, encoded as the conventional single letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    #[serde(rename = "N")]
    None,
    /// Odd parity.
    #[serde(rename = "O")]
    Odd,
    /// Even parity.
    #[serde(rename = "E")]
    Even,
    /// Mark parity (accepted in configs, unsupported by the serial backend).
    #[serde(rename = "M")]
    Mark,
    /// Space parity (accepted in configs, unsupported by the serial backend).
    #[serde(rename = "S")]
    Space,
}

impl Parity {
    /// Maps to the serial backend's parity setting.
    ///
    /// # Errors
    ///
    /// Mark and Space parity are carried in the data model but have no
    /// `tokio-serial` equivalent; they fail here with `InvalidConfig`.
    pub fn to_serial(self) -> HandlerResult<tokio_serial::Parity> {
        match self {
            Self::None => Ok(tokio_serial::Parity::None),
            Self::Odd => Ok(tokio_serial::Parity::Odd),
            Self::Even => Ok(tokio_serial::Parity::Even),
            Self::Mark | Self::Space => Err(HandlerError::invalid_config(format!(
                "parity '{:?}' is not supported by the serial backend",
                self
            ))),
        }
    }
}

// =============================================================================
// ModbusTcpConfig
// =============================================================================

/// Modbus TCP connection settings.
///
/// Envelope: `{host, port, timeout (seconds), unit_id?, mock?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    /// Server hostname or address.
    pub host: String,
    /// Server port (conventionally 502).
    pub port: u16,
    /// Per-request timeout in seconds.
    #[serde(rename = "timeout", default = "default_tcp_timeout_secs")]
    pub timeout_secs: u64,
    /// Default unit id for operations on this connection.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Use an in-memory mock transport instead of dialing.
    #[serde(default)]
    pub mock: bool,
}

fn default_tcp_timeout_secs() -> u64 {
    DEFAULT_TCP_TIMEOUT.as_secs()
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

impl ModbusTcpConfig {
    /// Creates a config with defaults for everything but the endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_secs: default_tcp_timeout_secs(),
            unit_id: DEFAULT_UNIT_ID,
            mock: false,
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the default unit id.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Enables the mock transport.
    pub fn with_mock(mut self) -> Self {
        self.mock = true;
        self
    }

    /// The per-request timeout as a [`Duration`]. Zero falls back to the
    /// default.
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            DEFAULT_TCP_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    /// The `host:port` dial string.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the settings.
    pub fn validate(&self) -> HandlerResult<()> {
        if self.host.is_empty() && !self.mock {
            return Err(HandlerError::invalid_config("host must not be empty"));
        }
        if self.port == 0 && !self.mock {
            return Err(HandlerError::invalid_config("port must not be zero"));
        }
        Ok(())
    }
}

// =============================================================================
// ModbusRtuConfig
// =============================================================================

/// Modbus RTU connection settings.
///
/// Envelope: `{port, baud_rate, data_bits, parity, stop_bits, timeout
/// (milliseconds), unit_id?, mock?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusRtuConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`).
    pub port: String,
    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5-8).
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity.
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits (1 or 2).
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Per-request timeout in milliseconds.
    #[serde(rename = "timeout", default = "default_rtu_timeout_ms")]
    pub timeout_ms: u64,
    /// Default unit id for operations on this connection.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Use an in-memory mock port instead of opening the device.
    #[serde(default)]
    pub mock: bool,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_rtu_timeout_ms() -> u64 {
    DEFAULT_RTU_TIMEOUT.as_millis() as u64
}

impl ModbusRtuConfig {
    /// Creates a 9600 8N1 config for the given device path.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            timeout_ms: default_rtu_timeout_ms(),
            unit_id: DEFAULT_UNIT_ID,
            mock: false,
        }
    }

    /// Sets the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Sets the parity.
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enables the mock transport.
    pub fn with_mock(mut self) -> Self {
        self.mock = true;
        self
    }

    /// The per-request timeout as a [`Duration`]. Zero falls back to the
    /// default.
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            DEFAULT_RTU_TIMEOUT
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    /// Maps data bits to the serial backend.
    pub fn serial_data_bits(&self) -> HandlerResult<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(HandlerError::invalid_config(format!(
                "data_bits must be 5-8, got {}",
                other
            ))),
        }
    }

    /// Maps stop bits to the serial backend.
    pub fn serial_stop_bits(&self) -> HandlerResult<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(HandlerError::invalid_config(format!(
                "stop_bits must be 1 or 2, got {}",
                other
            ))),
        }
    }

    /// Validates the settings.
    pub fn validate(&self) -> HandlerResult<()> {
        if self.port.is_empty() && !self.mock {
            return Err(HandlerError::invalid_config("port must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(HandlerError::invalid_config("baud_rate must not be zero"));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
