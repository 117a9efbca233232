use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;

/// CSI metrics collector
pub struct CsiMetrics {
    /// Total CSI operations
    pub operations_total: CounterVec,
    /// CSI operation duration in seconds
    pub operation_duration: HistogramVec,
    /// CSI operation errors
    pub operation_errors: CounterVec,
    /// Number of registered logical volumes
    pub volume_count: Gauge,
    /// Volume capacity in bytes
    pub volume_capacity: GaugeVec,
}

impl CsiMetrics {
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let operations_total = CounterVec::new(
            Opts::new("lvm_csi_operations_total", "Total CSI operations"),
            &["method"],
        )?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "lvm_csi_operation_duration_seconds",
                "CSI operation duration in seconds",
            ),
            &["method"],
        )?;

        let operation_errors = CounterVec::new(
            Opts::new("lvm_csi_operation_errors_total", "CSI operation errors"),
            &["method"],
        )?;

        let volume_count = Gauge::new("lvm_csi_volume_count", "Number of logical volumes")?;

        let volume_capacity = GaugeVec::new(
            Opts::new("lvm_csi_volume_capacity_bytes", "Volume capacity in bytes"),
            &["volume_id"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operation_duration.clone()))?;
        registry.register(Box::new(operation_errors.clone()))?;
        registry.register(Box::new(volume_count.clone()))?;
        registry.register(Box::new(volume_capacity.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            operation_errors,
            volume_count,
            volume_capacity,
        })
    }

    /// Metrics registered against a private registry. Used when nothing
    /// scrapes the process and by tests.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(Arc::new(Registry::new()))
    }

    /// Record an operation
    pub fn record_operation(&self, method: &str, duration_secs: f64, success: bool) {
        self.operations_total.with_label_values(&[method]).inc();
        self.operation_duration.with_label_values(&[method]).observe(duration_secs);
        if !success {
            self.operation_errors.with_label_values(&[method]).inc();
        }
    }

    /// Record `result` for `method`, timed from `started`, and hand it back.
    pub fn observe<T, E>(
        &self,
        method: &str,
        started: Instant,
        result: Result<T, E>,
    ) -> Result<T, E> {
        self.record_operation(method, started.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    pub fn add_volume(&self, volume_id: &str, capacity: i64) {
        self.volume_capacity.with_label_values(&[volume_id]).set(capacity as f64);
        self.volume_count.inc();
    }

    pub fn remove_volume(&self, volume_id: &str) {
        if self.volume_capacity.remove_label_values(&[volume_id]).is_ok() {
            self.volume_count.dec();
        }
    }
}
