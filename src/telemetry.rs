//! Tracing and OpenTelemetry setup
//!
//! Logs go to stdout through `tracing-subscriber`. When
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set an OTLP span exporter is layered on
//! top so reconcile spans land in the collector.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace as sdktrace;
use opentelemetry_sdk::Resource;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "optimism-operator";

/// Initialize the global tracing subscriber.
///
/// OTLP export is only wired up when `OTEL_EXPORTER_OTLP_ENDPOINT` is set;
/// otherwise the subscriber is plain stdout logging.
pub fn init_telemetry() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);

    let otel_layer = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(init_tracer(&endpoint)?)),
        Err(_) => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::ConfigError(format!("failed to set tracing subscriber: {e}")))?;

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<sdktrace::Tracer> {
    let mut attributes = vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    // Downward-API environment set by the operator Deployment
    if let Ok(pod_name) = std::env::var("POD_NAME") {
        attributes.push(KeyValue::new("k8s.pod.name", pod_name));
    }
    if let Ok(namespace) = std::env::var("POD_NAMESPACE") {
        attributes.push(KeyValue::new("k8s.namespace.name", namespace));
    }

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(sdktrace::config().with_resource(Resource::new(attributes)))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("failed to initialize OTLP tracer: {e}")))
}

/// Flush pending spans before the process exits.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
