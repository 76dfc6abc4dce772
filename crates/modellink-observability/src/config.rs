use std::{env, time::Duration};

use opentelemetry_otlp::Protocol;

use crate::exporters::{
    otlp::{TraceSinkConfig, parse_http_protocol, resolve_trace_sinks},
    stdout::{LogExporterKind, parse_log_exporter_kind},
};

const DEFAULT_TRACE_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_span_events: bool,
    pub log_exporter: LogExporterKind,
    pub trace_enabled: bool,
    pub trace_http_protocol: Protocol,
    pub trace_timeout: Duration,
    pub trace_sinks: Vec<TraceSinkConfig>,
    /// Problems found while reading the environment, logged after init.
    pub warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_level = lookup("ML_LOG_LEVEL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "info".to_string());
        let log_span_events = truthy(lookup("ML_LOG_SPAN_EVENTS"), false);
        let log_exporter =
            parse_log_exporter_kind(&lookup("ML_LOG_EXPORTER").unwrap_or_else(|| "stdout".to_string()));
        let trace_enabled = truthy(lookup("ML_TRACE_ENABLED"), false);
        let trace_http_protocol = parse_http_protocol(
            &lookup("ML_OTEL_TRACE_HTTP_PROTOCOL").unwrap_or_else(|| "binary".to_string()),
        );
        let trace_timeout = Duration::from_millis(
            lookup("ML_OTEL_TRACE_TIMEOUT_MS")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_TRACE_TIMEOUT_MS),
        );
        let (trace_sinks, warnings) = resolve_trace_sinks(
            trace_enabled,
            lookup("ML_OTEL_TRACE_EXPORTERS").as_deref(),
            lookup("ML_OTEL_TRACE_EXPORTER").as_deref(),
            lookup("ML_OTEL_TRACE_ENDPOINT").as_deref(),
        );

        Self {
            log_level,
            log_span_events,
            log_exporter,
            trace_enabled,
            trace_http_protocol,
            trace_timeout,
            trace_sinks,
            warnings,
        }
    }

    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub fn fallback_filter(&self) -> String {
        format!(
            "{level},modellink_app={level},modellink_core={level},modellink_tools={level}",
            level = self.log_level
        )
    }
}

fn truthy(value: Option<String>, default: bool) -> bool {
    value
        .map(|value| {
            let v = value.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(default)
}
