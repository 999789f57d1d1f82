//! Prometheus metrics for the mpath-agent
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::mpathconf::ComplianceStatus;

/// Metric names
pub mod names {
    /// Counter: Total operations by type and status
    pub const OPERATIONS_TOTAL: &str = "mpath_operations_total";
    /// Histogram: Duration of operations in seconds
    pub const OPERATION_DURATION_SECONDS: &str = "mpath_operation_duration_seconds";
    /// Counter: Processes killed to release a mount point
    pub const PROCESSES_KILLED_TOTAL: &str = "mpath_processes_killed_total";
    /// Gauge: Parameters per device type and compliance status
    pub const RECOMMENDATIONS: &str = "mpath_recommendations";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record an operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

pub fn record_processes_killed(count: usize) {
    counter!(names::PROCESSES_KILLED_TOTAL).increment(count as u64);
}

/// Set the number of parameters in `status` for a device type
pub fn set_recommendations(device_type: &str, status: ComplianceStatus, count: usize) {
    gauge!(names::RECOMMENDATIONS, "device_type" => device_type.to_string(), "status" => status.to_string())
        .set(count as f64);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, error_code, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let timer = OperationTimer::new("flush_device");
        timer.failure("error");
        record_processes_killed(2);
        set_recommendations("Nimble", ComplianceStatus::NotRecommended, 3);
    }
}
