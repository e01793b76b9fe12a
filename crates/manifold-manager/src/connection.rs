// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The manager-internal wrapper around one protocol handler.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tokio::time::Instant;

use manifold_core::handler::ProtocolHandler;
use manifold_core::types::{ConnectionRecord, ConnectionStatus, Parser};

/// One managed connection: the handler, its descriptor, the optional parser,
/// and the runtime state the manager tracks (status, retries, last activity).
pub struct ManagedConnection {
    handler: Box<dyn ProtocolHandler>,
    record: ConnectionRecord,
    parser: Option<Parser>,
    status: RwLock<ConnectionStatus>,
    last_error: RwLock<Option<String>>,
    retries: AtomicU32,
    last_active: RwLock<Instant>,
}

impl ManagedConnection {
    /// Wraps a freshly built handler.
    pub fn new(
        handler: Box<dyn ProtocolHandler>,
        record: ConnectionRecord,
        parser: Option<Parser>,
    ) -> Self {
        Self {
            handler,
            record,
            parser,
            status: RwLock::new(ConnectionStatus::Disconnected),
            last_error: RwLock::new(None),
            retries: AtomicU32::new(0),
            last_active: RwLock::new(Instant::now()),
        }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &dyn ProtocolHandler {
        self.handler.as_ref()
    }

    /// The connection id.
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// The attached parser, if any.
    pub fn parser(&self) -> Option<&Parser> {
        self.parser.as_ref()
    }

    /// The descriptor with the live runtime status patched in.
    pub fn record(&self) -> ConnectionRecord {
        let mut record = self.record.clone();
        record.status = self.status();
        record
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Sets the lifecycle status.
    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    /// The last error retained for observability (the `Error` sub-state).
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Records an error and moves the connection into the error sub-state.
    pub fn set_error(&self, error: impl std::fmt::Display) {
        *self.last_error.write() = Some(error.to_string());
        *self.status.write() = ConnectionStatus::Error;
    }

    /// Number of connect retries performed so far.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Counts one connect retry.
    pub fn bump_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Stamps the connection as active now.
    pub fn touch(&self) {
        *self.last_active.write() = Instant::now();
    }

    /// How long the connection has been idle.
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(*self.last_active.read())
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.record.id)
            .field("kind", &self.record.kind)
            .field("status", &self.status())
            .field("retries", &self.retries())
            .finish()
    }
}
