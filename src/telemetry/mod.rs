//! Tracing subscriber setup with optional OTLP export.
//!
//! Log lines always go to stderr so command output on stdout stays clean.
//! With an OTLP endpoint, spans, metrics and log records are exported too.

pub mod event;
pub mod metrics;

use std::fmt::Display;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "taskwire";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. `None` logs to stderr only.
    pub endpoint: Option<String>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn new(endpoint: Option<String>, log_level: impl Into<String>) -> Self {
        Self {
            endpoint,
            log_level: log_level.into(),
        }
    }
}

/// Keeps the OTLP pipelines alive. Dropping it flushes and shuts them down.
#[derive(Default)]
pub struct TelemetryGuard {
    exporters: Option<Exporters>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(exporters) = self.exporters.take() {
            let _ = exporters.logs.shutdown();
            let _ = exporters.metrics.shutdown();
            let _ = exporters.traces.shutdown();
        }
    }
}

/// Install the global subscriber. Fails if one is already installed or an
/// exporter cannot be built.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let stderr = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    let Some(endpoint) = config.endpoint else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .map_err(subscriber_error)?;
        return Ok(TelemetryGuard::default());
    };

    let exporters = Exporters::connect(&endpoint)?;
    opentelemetry::global::set_meter_provider(exporters.metrics.clone());
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(tracing_opentelemetry::layer().with_tracer(exporters.traces.tracer(SERVICE_NAME)))
        .with(OpenTelemetryTracingBridge::new(&exporters.logs))
        .try_init()
        .map_err(subscriber_error)?;

    Ok(TelemetryGuard {
        exporters: Some(exporters),
    })
}

fn subscriber_error(e: impl Display) -> Error {
    Error::Other(format!("failed to install tracing subscriber: {e}"))
}

struct Exporters {
    traces: SdkTracerProvider,
    metrics: SdkMeterProvider,
    logs: SdkLoggerProvider,
}

impl Exporters {
    fn connect(endpoint: &str) -> Result<Self> {
        let exporter_error =
            |signal: &str, e: &dyn Display| Error::Other(format!("OTLP {signal} exporter for {endpoint}: {e}"));
        let resource = Resource::builder()
            .with_service_name(SERVICE_NAME)
            .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
            .build();

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", &e))?;
        let traces = SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build();

        let measurements = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", &e))?;
        let metrics = SdkMeterProvider::builder()
            .with_periodic_exporter(measurements)
            .with_resource(resource.clone())
            .build();

        let records = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", &e))?;
        let logs = SdkLoggerProvider::builder()
            .with_batch_exporter(records)
            .with_resource(resource)
            .build();

        Ok(Self {
            traces,
            metrics,
            logs,
        })
    }
}
