use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// Stage and lookup timings are recorded in seconds
const BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

pub fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets(BUCKETS)
}

/// Installs the global recorder. The returned handle renders everything recorded so
/// far, which a batch run logs once it finishes.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    prometheus_builder()?.install_recorder()
}
