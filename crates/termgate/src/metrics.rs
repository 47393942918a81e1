//! In-process gateway metrics.
//!
//! Lock-free counters and gauges shared by every session through an
//! `Arc<GatewayMetrics>`. A [`MetricsSnapshot`] is logged at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by n.
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge metric.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1, saturating at zero.
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Get current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Increment now and decrement when the returned guard is dropped.
    #[must_use]
    pub fn track(&self) -> GaugeGuard<'_> {
        self.inc();
        GaugeGuard { gauge: self }
    }
}

/// Decrements its gauge on drop.
#[derive(Debug)]
pub struct GaugeGuard<'a> {
    gauge: &'a Gauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Gateway-wide metrics.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// TCP connections accepted.
    pub connections_accepted: Counter,
    /// Sessions that reached the session handler.
    pub sessions_started: Counter,
    /// Sessions currently running.
    pub sessions_active: Gauge,
    /// Sessions refused because no terminal was requested.
    pub sessions_refused: Counter,
    /// PTY allocation failures.
    pub allocation_failures: Counter,
    /// Program launch failures.
    pub launch_failures: Counter,
    /// Bytes relayed from programs to clients.
    pub bytes_to_clients: Counter,
    /// Bytes relayed from clients to programs.
    pub bytes_from_clients: Counter,
    /// Resize events applied to PTYs.
    pub resizes_applied: Counter,
    /// Connection log writes that failed.
    pub log_write_failures: Counter,
}

impl GatewayMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time copy of every value.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.get(),
            sessions_started: self.sessions_started.get(),
            sessions_active: self.sessions_active.get(),
            sessions_refused: self.sessions_refused.get(),
            allocation_failures: self.allocation_failures.get(),
            launch_failures: self.launch_failures.get(),
            bytes_to_clients: self.bytes_to_clients.get(),
            bytes_from_clients: self.bytes_from_clients.get(),
            resizes_applied: self.resizes_applied.get(),
            log_write_failures: self.log_write_failures.get(),
        }
    }
}

/// Point-in-time copy of [`GatewayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub sessions_started: u64,
    pub sessions_active: u64,
    pub sessions_refused: u64,
    pub allocation_failures: u64,
    pub launch_failures: u64,
    pub bytes_to_clients: u64,
    pub bytes_from_clients: u64,
    pub resizes_applied: u64,
    pub log_write_failures: u64,
}

impl MetricsSnapshot {
    /// Emit the snapshot as one structured log event.
    pub fn log(&self) {
        tracing::info!(
            connections = self.connections_accepted,
            sessions = self.sessions_started,
            active = self.sessions_active,
            refused = self.sessions_refused,
            allocation_failures = self.allocation_failures,
            launch_failures = self.launch_failures,
            bytes_out = self.bytes_to_clients,
            bytes_in = self.bytes_from_clients,
            resizes = self.resizes_applied,
            log_write_failures = self.log_write_failures,
            "gateway metrics"
        );
    }
}
