//! Logging setup and RPC metrics.
//!
//! Metrics go through the `metrics` facade. A Prometheus recorder is
//! installed the first time monitoring is requested, and its handle
//! renders the text exposition served on the gateway's `/metrics`.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

pub const REQUESTS_TOTAL: &str = "rpc_requests_total";
pub const REQUEST_DURATION: &str = "rpc_request_duration_seconds";

const LATENCY_BUCKETS: [f64; 10] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 5.0];

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Returns the process-wide Prometheus handle, installing the recorder on
/// first use.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            let builder = PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), &LATENCY_BUCKETS)
                .unwrap_or_else(|e| {
                    tracing::warn!("using summary for request latency: {}", e);
                    PrometheusBuilder::new()
                });
            let recorder = builder.build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("a metrics recorder was already installed");
            }
            handle
        })
        .clone()
}

/// Records one finished call
pub fn record_call(method: &str, code: u16, elapsed: Duration) {
    metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION, "method" => method.to_string())
        .record(elapsed.as_secs_f64());
}
