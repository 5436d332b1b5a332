//! Observability and Metrics
//!
//! Per-server counters for connections, requests and failures.
//!
//! Uses atomic counters for thread-safe metrics collection. One [`Metrics`]
//! instance is owned by each [`Server`](crate::service::server::Server) and shared
//! with its modules, so independent servers in one process never mix numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one server
#[derive(Debug)]
pub struct Metrics {
    /// Total TCP connections accepted
    pub connections_total: AtomicU64,
    /// Currently open TCP connections
    pub connections_active: AtomicU64,
    /// Total datagrams received
    pub datagrams_received: AtomicU64,
    /// Requests decoded and turned into sessions
    pub requests_total: AtomicU64,
    /// Replies written
    pub responses_total: AtomicU64,
    /// Framing or decode failures
    pub decode_errors: AtomicU64,
    /// Unknown or unroutable rpc names
    pub routing_errors: AtomicU64,
    /// Handler failures, including panics
    pub handler_errors: AtomicU64,
    /// Requests refused by backpressure
    pub rejected_total: AtomicU64,
    /// Encode or socket write failures
    pub write_errors: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            responses_total: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            routing_errors: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a datagram received
    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a stream frame received
    pub fn frame_received(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a request entering dispatch
    pub fn request_received(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply written
    pub fn response_sent(&self, byte_count: u64) {
        self.responses_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routing_error(&self) {
        self.routing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_rejected(&self) {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            responses_total: self.responses_total.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            datagrams_received = snapshot.datagrams_received,
            requests_total = snapshot.requests_total,
            responses_total = snapshot.responses_total,
            decode_errors = snapshot.decode_errors,
            routing_errors = snapshot.routing_errors,
            handler_errors = snapshot.handler_errors,
            rejected_total = snapshot.rejected_total,
            write_errors = snapshot.write_errors,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            uptime_seconds = snapshot.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub datagrams_received: u64,
    pub requests_total: u64,
    pub responses_total: u64,
    pub decode_errors: u64,
    pub routing_errors: u64,
    pub handler_errors: u64,
    pub rejected_total: u64,
    pub write_errors: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = Metrics::new();
        m.connection_established();
        m.connection_established();
        m.connection_closed();
        m.request_received();
        m.response_sent(10);
        m.datagram_received(7);
        m.routing_error();

        let s = m.snapshot();
        assert_eq!(s.connections_total, 2);
        assert_eq!(s.connections_active, 1);
        assert_eq!(s.requests_total, 1);
        assert_eq!(s.responses_total, 1);
        assert_eq!(s.bytes_sent, 10);
        assert_eq!(s.bytes_received, 7);
        assert_eq!(s.routing_errors, 1);
        assert_eq!(s.handler_errors, 0);
    }
}
