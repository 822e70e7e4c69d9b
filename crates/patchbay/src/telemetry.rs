//! Logging and optional OpenTelemetry export.
//!
//! The fmt layer is always installed. Traces, logs and metrics are exported
//! over OTLP/gRPC only when an endpoint is configured.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Flushes and shuts down the OTLP providers when dropped.
pub struct TelemetryGuard {
    providers: Option<Providers>,
}

struct Providers {
    tracer: SdkTracerProvider,
    logger: SdkLoggerProvider,
    meter: SdkMeterProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(providers) = self.providers.take() else {
            return;
        };
        // The subscriber may already be exporting through these providers,
        // so report problems on stderr rather than through tracing.
        if let Err(e) = providers.tracer.shutdown() {
            eprintln!("trace provider shutdown failed: {e}");
        }
        if let Err(e) = providers.logger.shutdown() {
            eprintln!("log provider shutdown failed: {e}");
        }
        if let Err(e) = providers.meter.shutdown() {
            eprintln!("meter provider shutdown failed: {e}");
        }
    }
}

/// Build the filter from `RUST_LOG` if set, otherwise from the configured level.
///
/// A bare level like `warn` keeps this workspace's crates at debug; a full
/// directive list is used as-is.
fn env_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directives = if log_level.contains('=') || log_level.contains(',') {
        log_level.to_string()
    } else {
        format!("{},patchbay=debug,patchgraph=debug", log_level)
    };
    EnvFilter::try_new(&directives)
        .unwrap_or_else(|_| EnvFilter::new("info,patchbay=debug,patchgraph=debug"))
}

fn endpoint_url(otlp_endpoint: &str) -> String {
    if otlp_endpoint.contains("://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{}", otlp_endpoint)
    }
}

/// Install the global subscriber. An empty `otlp_endpoint` means local logs only.
pub fn init(otlp_endpoint: &str, log_level: &str) -> Result<TelemetryGuard> {
    if otlp_endpoint.trim().is_empty() {
        tracing_subscriber::registry()
            .with(env_filter(log_level))
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(TelemetryGuard { providers: None });
    }

    let resource = Resource::builder_empty()
        .with_service_name("patchbay")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = endpoint_url(otlp_endpoint);

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let batch_span_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(batch_span_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("patchbay");
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let log_processor = opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build();

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(log_processor)
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();

    global::set_meter_provider(meter_provider.clone());

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(endpoint = %otlp_endpoint, "OTLP export enabled for traces, logs and metrics");

    Ok(TelemetryGuard {
        providers: Some(Providers {
            tracer: tracer_provider,
            logger: logger_provider,
            meter: meter_provider,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_adds_scheme() {
        assert_eq!(endpoint_url("127.0.0.1:4317"), "http://127.0.0.1:4317");
        assert_eq!(endpoint_url("https://otel.lan:4317"), "https://otel.lan:4317");
    }

    #[test]
    fn test_env_filter_accepts_levels_and_directives() {
        let _ = env_filter("warn");
        let _ = env_filter("info,patchgraph=trace");
        let _ = env_filter("not a level");
    }
}
