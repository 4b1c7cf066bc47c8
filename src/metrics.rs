//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a finished download attempt (`outcome` is "success" or "failure")
pub fn record_download(model_id: &str, outcome: &'static str) {
    metrics::counter!("model_host_downloads_total",
        "model" => model_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a finished load attempt
pub fn record_load(model_id: &str, outcome: &'static str) {
    metrics::counter!("model_host_loads_total",
        "model" => model_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record model unload
pub fn record_unload(model_id: &str) {
    metrics::counter!("model_host_unloads_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a served chat completion
pub fn record_completion(model_id: &str, stream: bool) {
    metrics::counter!("model_host_completions_total",
        "model" => model_id.to_string(),
        "stream" => if stream { "true" } else { "false" }
    )
    .increment(1);
}

/// Update loaded model count gauge
pub fn update_loaded_count(count: usize) {
    metrics::gauge!("model_host_loaded_models").set(count as f64);
}
