//! OpenTelemetry export for drain spans
//!
//! Enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Spans from
//! `#[instrument]` (one per node task, one per eviction) are exported over OTLP/gRPC.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

pub const SERVICE_NAME: &str = "node-drainer";

/// Build the OpenTelemetry layer for `subscriber`, or `None` if no endpoint is
/// configured or the exporter cannot be installed.
pub fn init_telemetry<S>(_subscriber: &S) -> Option<OpenTelemetryLayer<S, trace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio);

    match tracer {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
        Err(e) => {
            eprintln!("Failed to install OpenTelemetry exporter: {}", e);
            None
        }
    }
}

/// Flush pending spans. Safe to call when telemetry was never initialized.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
