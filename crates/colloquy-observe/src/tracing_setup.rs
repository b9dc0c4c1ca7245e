//! Tracing subscriber setup for the gateway.
//!
//! Log output is line-oriented `fmt` with span close timing. The filter
//! comes from `RUST_LOG` when set, otherwise from the caller's default
//! directive (the serve command derives one from CLI verbosity). Span
//! export over OpenTelemetry is opt-in and uses the stdout exporter;
//! a real deployment would swap that for OTLP.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Provider handle kept so the shutdown flush can reach it.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails when a global subscriber has already been installed.
pub fn init_tracing(
    default_filter: &str,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let bridge = tracing_opentelemetry::layer().with_tracer(provider.tracer("colloquy"));
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        registry.with(bridge).try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}

/// Flush buffered spans and stop the exporter.
///
/// Called once on process exit; a no-op when OTel export was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(error) = provider.shutdown() {
            eprintln!("otel shutdown: {error}");
        }
    }
}
