// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-connection transfer metrics.
//!
//! Counters are monotonic and only advance inside the owning handler. The
//! struct is cheap to share (`Arc<ConnectionMetrics>`) and `snapshot()`
//! produces a serializable view for the API surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// ConnectionMetrics
// =============================================================================

/// Monotonic transfer counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Total bytes read from the transport.
    bytes_read: AtomicU64,
    /// Total bytes written to the transport.
    bytes_written: AtomicU64,
    /// Completed read operations.
    read_count: AtomicU64,
    /// Completed write operations.
    write_count: AtomicU64,
    /// Failed operations.
    error_count: AtomicU64,
    /// Accumulated transaction latency in microseconds.
    latency_total_us: AtomicU64,
    /// Number of latency samples.
    latency_samples: AtomicU64,
    /// Wall-clock time of the last successful read.
    last_read: RwLock<Option<DateTime<Utc>>>,
    /// Wall-clock time of the last successful write.
    last_write: RwLock<Option<DateTime<Utc>>>,
}

impl ConnectionMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed read of `bytes` bytes.
    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        self.read_count.fetch_add(1, Ordering::Relaxed);
        *self.last_read.write() = Some(Utc::now());
    }

    /// Records a completed write of `bytes` bytes.
    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        *self.last_write.write() = Some(Utc::now());
    }

    /// Records a failed operation.
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one transaction latency sample.
    pub fn record_latency(&self, latency: Duration) {
        self.latency_total_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current error count.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time view of the counters.
    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let total_us = self.latency_total_us.load(Ordering::Relaxed);

        ConnectionMetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            read_count: self.read_count.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_read: *self.last_read.read(),
            last_write: *self.last_write.read(),
            average_latency_ms: if samples > 0 {
                (total_us as f64 / samples as f64) / 1000.0
            } else {
                0.0
            },
        }
    }
}

/// A serializable snapshot of [`ConnectionMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetricsSnapshot {
    /// Total bytes read.
    pub bytes_read: u64,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Completed reads.
    pub read_count: u64,
    /// Completed writes.
    pub write_count: u64,
    /// Failed operations.
    pub error_count: u64,
    /// Time of the last successful read.
    pub last_read: Option<DateTime<Utc>>,
    /// Time of the last successful write.
    pub last_write: Option<DateTime<Utc>>,
    /// Rolling average transaction latency in milliseconds.
    pub average_latency_ms: f64,
}

// =============================================================================
// Tests
// =============================================================================
