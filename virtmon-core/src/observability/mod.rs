//! Observability infrastructure: tracing, metrics, health checks.

use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self, RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod health;
pub mod metrics;

/// Check if OTLP tracing is enabled via environment variable.
/// Set VIRTMON_OTLP_ENABLED=1 or OTEL_EXPORTER_OTLP_ENDPOINT to enable.
fn otlp_enabled() -> bool {
    std::env::var("VIRTMON_OTLP_ENABLED").is_ok()
        || std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
}

/// Get the OTLP endpoint (default: http://localhost:4317)
fn otlp_endpoint() -> String {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string())
}

/// Build the log filter: `RUST_LOG` wins, otherwise the configured level.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global observability infrastructure.
///
/// Must be called once at startup, from inside a tokio runtime. A
/// `metrics_port` of 0 leaves the Prometheus exporter off.
pub fn init(log_level: &str, metrics_port: u16) -> Result<(), Box<dyn std::error::Error>> {
    // Build the base subscriber
    let subscriber = tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true));

    // Conditionally add OTLP tracing layer
    if otlp_enabled() {
        let endpoint = otlp_endpoint();

        let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(&endpoint);

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                trace::config()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", "virtmond"),
                        opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ])),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
        subscriber.with(telemetry).try_init()?;
        tracing::info!("Observability initialized with OTLP tracing (endpoint: {})", endpoint);
    } else {
        subscriber.try_init()?;
        tracing::info!(
            "Observability initialized (OTLP disabled - set VIRTMON_OTLP_ENABLED=1 to enable)"
        );
    }

    // Set up Prometheus metrics exporter
    if metrics_port != 0 {
        PrometheusBuilder::new().with_http_listener(([0, 0, 0, 0], metrics_port)).install()?;
        tracing::info!(port = metrics_port, "Prometheus exporter listening");
    }

    // Register core metrics
    metrics::register_core_metrics();

    Ok(())
}

/// Shutdown observability infrastructure gracefully.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back() {
        // An unparsable level must not panic.
        let _ = env_filter("not a [valid filter");
        let _ = env_filter("debug");
    }
}
