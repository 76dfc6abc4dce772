use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod exporters;

use config::ObservabilityConfig;
use exporters::otlp::build_trace_exporters;
use exporters::stdout::{LogExporterKind, span_events_mask};

/// Keeps the trace pipeline alive. Dropping it flushes and shuts down
/// exporters, so hold it for the life of the process.
#[must_use = "dropping the guard shuts down trace export"]
pub struct ObservabilityGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl ObservabilityGuard {
    pub fn trace_export_active(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(error) = provider.shutdown()
        {
            eprintln!("modellink: trace provider shutdown failed: {error}");
        }
    }
}

pub fn init_observability(service_name: &str) -> ObservabilityGuard {
    init_with_config(service_name, &ObservabilityConfig::from_env())
}

pub fn init_with_config(service_name: &str, config: &ObservabilityConfig) -> ObservabilityGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.fallback_filter()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = (config.log_exporter == LogExporterKind::Stdout).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stdout)
            .with_span_events(span_events_mask(config.log_span_events))
    });

    let (tracer_provider, export_failures) = build_tracer_provider(service_name, config);
    let telemetry_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .try_init()
        .ok();

    for reason in config.warnings.iter().chain(&export_failures) {
        warn!(event = "observability.config.ignored", reason = %reason);
    }
    info!(
        event = "observability.initialized",
        service = service_name,
        log_level = %config.log_level,
        trace_sinks = config.trace_sinks.len(),
        trace_export = tracer_provider.is_some()
    );

    ObservabilityGuard { tracer_provider }
}

fn build_tracer_provider(
    service_name: &str,
    config: &ObservabilityConfig,
) -> (Option<SdkTracerProvider>, Vec<String>) {
    if !config.trace_enabled {
        return (None, Vec::new());
    }
    let (exporters, failures) =
        build_trace_exporters(&config.trace_sinks, config.trace_timeout, config.trace_http_protocol);
    if exporters.is_empty() {
        return (None, failures);
    }

    let resource = Resource::builder().with_service_name(service_name.to_string()).build();
    let provider = exporters
        .into_iter()
        .fold(SdkTracerProvider::builder().with_resource(resource), |builder, exporter| {
            builder.with_batch_exporter(exporter)
        })
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    (Some(provider), failures)
}
