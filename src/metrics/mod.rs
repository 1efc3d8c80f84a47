// Transcript API metrics for monitoring and observability
//
// A pluggable exporter behind a small facade. Metric failures are logged and
// never surface to request handling.

pub mod error;
pub mod null;
pub mod prometheus;

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

pub use error::MetricsError;
use self::null::NullExporter;
use self::prometheus::PrometheusExporter;

/// Metrics exporter trait for pluggable monitoring systems
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError>;

    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Export metrics in the format expected by the monitoring system
    async fn export(&self) -> Result<Vec<u8>, MetricsError>;
}

/// Metrics facade for the application
#[derive(Clone)]
pub struct Metrics {
    exporter: Arc<dyn MetricsExporter>,
}

impl Metrics {
    pub fn new(exporter: Arc<dyn MetricsExporter>) -> Self {
        Self { exporter }
    }

    /// Facade with metrics disabled
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullExporter))
    }

    pub async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        self.exporter.export().await
    }

    async fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        if let Err(e) = self.exporter.increment(name, labels).await {
            warn!("Failed to increment counter '{}': {}", name, e);
        }
    }

    async fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.exporter.set_gauge(name, value, labels).await {
            warn!("Failed to set gauge '{}': {}", name, e);
        }
    }

    async fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.exporter.observe_histogram(name, value, labels).await {
            warn!("Failed to observe histogram '{}': {}", name, e);
        }
    }

    /// Record HTTP request duration
    pub async fn record_http_request(
        &self,
        endpoint: &str,
        method: &str,
        status: &str,
        duration: f64,
    ) {
        let labels = [
            ("endpoint", endpoint),
            ("method", method),
            ("status", status),
        ];
        self.observe_histogram("http_request_duration_seconds", duration, &labels)
            .await;
        self.increment("http_requests_total", &labels).await;
    }

    pub async fn record_cache_lookup(&self, hit: bool) {
        let name = if hit {
            "cache_hits_total"
        } else {
            "cache_misses_total"
        };
        self.increment(name, &[]).await;
    }

    pub async fn record_admission_rejected(&self) {
        self.increment("admission_rejections_total", &[]).await;
    }

    /// Record a finished pipeline run; `outcome` is "completed" or an error kind
    pub async fn record_job_finished(
        &self,
        model: &str,
        language: &str,
        outcome: &str,
        duration: f64,
    ) {
        let labels = [("model", model), ("language", language), ("outcome", outcome)];
        self.observe_histogram("job_duration_seconds", duration, &labels)
            .await;
        self.increment("jobs_finished_total", &labels).await;
    }

    pub async fn set_jobs_in_flight(&self, count: usize) {
        self.set_gauge("jobs_in_flight", count as f64, &[]).await;
    }
}

/// Factory function to create metrics exporter based on configuration
pub fn create_metrics_exporter(exporter_type: &str) -> Arc<dyn MetricsExporter> {
    match exporter_type.to_lowercase().as_str() {
        "prometheus" => {
            debug!("Initializing Prometheus metrics exporter");
            Arc::new(PrometheusExporter::new())
        }
        "none" | "null" | "disabled" => {
            debug!("Metrics disabled, using null exporter");
            Arc::new(NullExporter)
        }
        _ => {
            warn!(
                "Unknown metrics exporter type '{}', using null exporter",
                exporter_type
            );
            Arc::new(NullExporter)
        }
    }
}
