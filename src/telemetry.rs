//! Telemetry setup for k8s-gateway-dns.
//!
//! Installs the tracing subscriber from the configured log level, and
//! optionally a Prometheus metrics exporter (`prometheus` feature) and an
//! OTLP span exporter (`otel` feature). [`init`] returns a guard that
//! flushes exporters when dropped at the end of `main`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Keeps exporters alive; flushes them on drop.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Error shutting down tracer provider: {}", e);
            }
        }
    }
}

/// Initialize telemetry (tracing, metrics, optional OTLP).
pub fn init(
    config: &TelemetryConfig,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let fmt_layer = tracing_subscriber::fmt::layer();

    #[allow(unused_mut)]
    let mut guard = TelemetryGuard::default();

    #[cfg(feature = "otel")]
    {
        if let Some(otel_config) = &config.opentelemetry {
            let provider = build_tracer_provider(otel_config)?;

            use opentelemetry::trace::TracerProvider;
            let tracer = provider.tracer("k8s-gateway-dns");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            guard.tracer_provider = Some(provider);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            tracing::info!(endpoint = %otel_config.endpoint, "OpenTelemetry tracing enabled");
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
    }

    #[cfg(not(feature = "otel"))]
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        use metrics_exporter_prometheus::PrometheusBuilder;

        PrometheusBuilder::new().with_http_listener(addr).install()?;
        tracing::info!(%addr, "Prometheus metrics exporter started");
    }

    Ok(guard)
}

#[cfg(feature = "otel")]
fn build_tracer_provider(
    config: &crate::config::OpenTelemetryConfig,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, Box<dyn std::error::Error + Send + Sync>>
{
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk as otlp_sdk;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()?;

    let resource = otlp_sdk::Resource::builder()
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ])
        .build();

    Ok(otlp_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
