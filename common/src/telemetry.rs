//! Logging/telemetry bootstrap, adapted from the teacher's
//! `fetiche-common::logging::init_logging`: an `EnvFilter`-driven
//! `tracing_subscriber` registry with an optional hierarchical pretty
//! layer for interactive use and optional OTLP export for production.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_tree::HierarchicalLayer;

/// What the bootstrap should do; set by the daemon's CLI flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct TelemetryOptions {
    /// Render spans as an indented tree (nice for a terminal, noisy for a
    /// log aggregator).
    pub hierarchical: bool,
    #[cfg(feature = "otlp")]
    pub otlp_endpoint: Option<&'static str>,
}

/// Initialize the global `tracing` subscriber. Idempotent only in the
/// sense that calling it twice panics (same as the teacher's
/// `init_logging`) — call once, from `main`.
pub fn init(name: &'static str, opts: TelemetryOptions) -> Result<(), eyre::Report> {
    let filter = EnvFilter::from_default_env();

    let tree = if opts.hierarchical {
        Some(
            HierarchicalLayer::new(2)
                .with_ansi(true)
                .with_span_retrace(true)
                .with_span_modes(true)
                .with_targets(true)
                .with_bracketed_fields(true),
        )
    } else {
        None
    };

    let fmt = if opts.hierarchical {
        None
    } else {
        Some(tracing_subscriber::fmt::layer())
    };

    let registry = tracing_subscriber::registry().with(filter).with(tree).with(fmt);

    #[cfg(feature = "otlp")]
    {
        let otlp_layer = opts.otlp_endpoint.map(|endpoint| build_otlp_layer(name, endpoint)).transpose()?;
        registry.with(otlp_layer).init();
    }
    #[cfg(not(feature = "otlp"))]
    {
        let _ = name;
        registry.init();
    }

    Ok(())
}

#[cfg(feature = "otlp")]
fn build_otlp_layer<S>(
    name: &'static str,
    endpoint: &str,
) -> Result<tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>, eyre::Report>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider;
    let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint);
    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;
    let tracer = provider.tracer(name);
    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Shut down any exporter flush pipelines cleanly. Call on process exit.
pub fn close() {
    #[cfg(feature = "otlp")]
    opentelemetry::global::shutdown_tracer_provider();
}
