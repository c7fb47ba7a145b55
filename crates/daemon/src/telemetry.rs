//! Logging and optional OpenTelemetry export
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default `courier=info`)
//! - `COURIER_LOG_FORMAT`: `pretty` (default) or `json`
//! - `COURIER_LOG_DIR`: also write JSON logs to a daily rolling file there
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g. http://localhost:4317),
//!   needs the `telemetry` feature
//! - `OTEL_SERVICE_NAME`: service name (default `courier-daemon`)

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use tracing_subscriber::Registry;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const DEFAULT_FILTER: &str = "courier=info";
const LOG_FILE_PREFIX: &str = "courier.log";

/// Keeps background log writers and the tracer provider alive
pub struct TelemetryGuard {
    _file_writer: Option<WorkerGuard>,
    otel_enabled: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.otel_enabled {
            #[cfg(feature = "telemetry")]
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Install the global subscriber
pub fn init() -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let log_format = std::env::var("COURIER_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    layers.push(match log_format.as_str() {
        // Production: JSON structured logging
        "json" => fmt::layer().json().boxed(),
        // Development: pretty formatting with colors
        _ => fmt::layer().pretty().boxed(),
    });

    let file_writer = match std::env::var("COURIER_LOG_DIR") {
        Ok(dir) => {
            let dir = shellexpand::tilde(&dir).into_owned();
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        Err(_) => None,
    };

    let otel_layer = otel_layer()?;
    let otel_enabled = otel_layer.is_some();
    layers.extend(otel_layer);

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(TelemetryGuard {
        _file_writer: file_writer,
        otel_enabled,
    })
}

#[cfg(not(feature = "telemetry"))]
fn otel_layer() -> Result<Option<BoxedLayer>> {
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        // Subscriber is not installed yet
        eprintln!(
            "OTEL_EXPORTER_OTLP_ENDPOINT is set but the 'telemetry' feature is not enabled; \
             rebuild with --features telemetry"
        );
    }
    Ok(None)
}

#[cfg(feature = "telemetry")]
fn otel_layer() -> Result<Option<BoxedLayer>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "courier-daemon".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP span exporter")?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(
        tracing_opentelemetry::layer().with_tracer(tracer).boxed(),
    ))
}
