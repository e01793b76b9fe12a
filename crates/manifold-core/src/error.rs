// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for Manifold.
//!
//! Every subsystem error converts into the root [`ManifoldError`], and each
//! domain enum distinguishes retryable from non-retryable failures.
//!
//! # Error Hierarchy
//!
//! ```text
//! ManifoldError (root)
//! ├── HandlerError  - protocol handler / transport operations
//! ├── ParseError    - parser engine decoding
//! ├── StorageError  - storage collaborator
//! └── ConfigError   - bootstrap configuration
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// =============================================================================
// ManifoldError - Root Error Type
// =============================================================================

/// The root error type for Manifold.
#[derive(Debug, Error)]
pub enum ManifoldError {
    /// Protocol handler error.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Parser engine error.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Storage collaborator error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ManifoldError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler(e) => e.is_retryable(),
            Self::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the error domain as a string for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Handler(_) => "handler",
            Self::Parse(_) => "parse",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

// =============================================================================
// HandlerError
// =============================================================================

/// Errors raised by protocol handlers and their transports.
///
/// The distinction that matters operationally: [`HandlerError::Transport`]
/// closes the underlying transport, while `Timeout`, `Crc`, `Protocol`, and
/// `Exception` leave it open.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Operation attempted on a handler with no live transport.
    #[error("Not connected")]
    NotConnected,

    /// The deadline expired during a read or write.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The configured per-request timeout.
        duration: Duration,
    },

    /// Underlying I/O failure. The transport is closed when this surfaces.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// RTU CRC mismatch. The transport stays open.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Crc {
        /// CRC computed over the received prefix.
        expected: u16,
        /// CRC carried in the frame trailer.
        actual: u16,
    },

    /// Protocol violation: transaction-id mismatch, unexpected function code
    /// echo, short response, invalid byte count.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// The peer returned a Modbus exception response.
    #[error("Modbus exception {exception_code:#04x} for function {function_code:#04x}")]
    Exception {
        /// The requested function code (high bit cleared).
        function_code: u8,
        /// The exception code carried in the response.
        exception_code: u8,
    },

    /// The protocol-specific config blob failed to deserialize or validate.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// The cancellation token fired mid-operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error with a source.
    pub fn transport_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a CRC mismatch error.
    pub fn crc(expected: u16, actual: u16) -> Self {
        Self::Crc { expected, actual }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a Modbus exception error.
    pub fn exception(function_code: u8, exception_code: u8) -> Self {
        Self::Exception {
            function_code,
            exception_code,
        }
    }

    /// Creates an invalid-config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    ///
    /// Transient transport conditions are worth another attempt; protocol
    /// violations and peer exceptions are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout { .. } | Self::Transport { .. }
        )
    }

    /// Returns `true` if surfacing this error must close the transport.
    pub fn closes_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns the error type for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Crc { .. } => "crc",
            Self::Protocol { .. } => "protocol",
            Self::Exception { .. } => "modbus_exception",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Clone for HandlerError {
    fn clone(&self) -> Self {
        match self {
            Self::NotConnected => Self::NotConnected,
            Self::Timeout { duration } => Self::Timeout {
                duration: *duration,
            },
            Self::Transport { message, .. } => Self::Transport {
                message: message.clone(),
                source: None,
            },
            Self::Crc { expected, actual } => Self::Crc {
                expected: *expected,
                actual: *actual,
            },
            Self::Protocol { message } => Self::Protocol {
                message: message.clone(),
            },
            Self::Exception {
                function_code,
                exception_code,
            } => Self::Exception {
                function_code: *function_code,
                exception_code: *exception_code,
            },
            Self::InvalidConfig { message } => Self::InvalidConfig {
                message: message.clone(),
            },
            Self::Cancelled => Self::Cancelled,
        }
    }
}

// =============================================================================
// ParseError
// =============================================================================

/// Errors raised by the parser engine.
///
/// Any field failure aborts the whole parse; no partial results are observable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A field's offset + width exceeds the supplied buffer.
    #[error("Field out of range: offset {offset} + width {width} > buffer length {len}")]
    OutOfRange {
        /// Byte offset of the field.
        offset: usize,
        /// Decode width in bytes.
        width: usize,
        /// Buffer length.
        len: usize,
    },

    /// The buffer is shorter than a builtin codec requires.
    #[error("Buffer too short: need {needed} bytes, got {len}")]
    ShortBuffer {
        /// Bytes required by the codec.
        needed: usize,
        /// Buffer length.
        len: usize,
    },

    /// Unrecognized builtin parser tag.
    #[error("Unknown builtin parser type: {name}")]
    UnknownBuiltin {
        /// The offending tag.
        name: String,
    },

    /// Malformed field content (e.g. non-digit bytes in an ASCII number).
    #[error("Invalid field data: {message}")]
    Invalid {
        /// Error message.
        message: String,
    },
}

impl ParseError {
    /// Creates an out-of-range error.
    pub fn out_of_range(offset: usize, width: usize, len: usize) -> Self {
        Self::OutOfRange { offset, width, len }
    }

    /// Creates a short-buffer error.
    pub fn short_buffer(needed: usize, len: usize) -> Self {
        Self::ShortBuffer { needed, len }
    }

    /// Creates an unknown-builtin error.
    pub fn unknown_builtin(name: impl Into<String>) -> Self {
        Self::UnknownBuiltin { name: name.into() }
    }

    /// Creates an invalid-data error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Returns the error type for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } => "out_of_range",
            Self::ShortBuffer { .. } => "short_buffer",
            Self::UnknownBuiltin { .. } => "unknown_builtin",
            Self::Invalid { .. } => "invalid",
        }
    }
}

// =============================================================================
// StorageError
// =============================================================================

/// Errors surfaced by the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record with the given id.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource kind ("connection", "parser", ...).
        resource: &'static str,
        /// The missing id.
        id: String,
    },

    /// Backend failure (I/O, constraint violation, ...).
    #[error("Storage backend error: {message}")]
    Backend {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a backend error with a source.
    pub fn backend_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Returns the error type for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Backend { .. } => "backend",
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Bootstrap configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A field failed validation.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// A Result type with [`ManifoldError`].
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// A Result type with [`HandlerError`].
pub type HandlerResult<T> = Result<T, HandlerError>;

/// A Result type with [`ParseError`].
pub type ParseResult<T> = Result<T, ParseError>;

/// A Result type with [`StorageError`].
pub type StorageResult<T> = Result<T, StorageError>;

/// A Result type with [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Tests
// =============================================================================
