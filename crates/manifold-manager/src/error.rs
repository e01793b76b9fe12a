// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error type for connection-manager operations.

use thiserror::Error;

use manifold_core::error::{HandlerError, ParseError, StorageError};

/// Errors surfaced by the [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No managed connection with the given id.
    #[error("Connection not found: {id}")]
    NotFound {
        /// The missing connection id.
        id: String,
    },

    /// No handler factory is registered for the connection's protocol.
    #[error("Unknown protocol: {kind}")]
    UnknownProtocol {
        /// The unsupported protocol kind.
        kind: String,
    },

    /// A protocol handler operation failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The attached parser rejected the response bytes.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// One or more handlers failed to disconnect during shutdown.
    #[error("Errors during shutdown: {}", errors.join("; "))]
    Shutdown {
        /// The individual disconnect failures.
        errors: Vec<String>,
    },
}

impl ManagerError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an unknown-protocol error.
    pub fn unknown_protocol(kind: impl Into<String>) -> Self {
        Self::UnknownProtocol { kind: kind.into() }
    }

    /// Returns the error type for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::UnknownProtocol { .. } => "unknown_protocol",
            Self::Handler(e) => e.error_type(),
            Self::Storage(e) => e.error_type(),
            Self::Parse(e) => e.error_type(),
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

/// A Result type with [`ManagerError`].
pub type ManagerResult<T> = Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_types() {
        assert_eq!(ManagerError::not_found("c-1").error_type(), "not_found");
        assert_eq!(
            ManagerError::unknown_protocol("dnp3").error_type(),
            "unknown_protocol"
        );
        let err: ManagerError = HandlerError::timeout(Duration::from_secs(1)).into();
        assert_eq!(err.error_type(), "timeout");
    }

    #[test]
    fn test_shutdown_aggregates() {
        let err = ManagerError::Shutdown {
            errors: vec!["c-1: broken pipe".into(), "c-2: port gone".into()],
        };
        let text = err.to_string();
        assert!(text.contains("c-1"));
        assert!(text.contains("c-2"));
    }
}
