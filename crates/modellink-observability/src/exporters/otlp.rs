use std::time::Duration;

use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};

const DEFAULT_OTEL_TRACE_GRPC_ENDPOINT: &str = "http://127.0.0.1:4317";
const DEFAULT_OTEL_TRACE_HTTP_ENDPOINT: &str = "http://127.0.0.1:4318/v1/traces";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceExporterKind {
    OtlpGrpc,
    OtlpHttp,
}

impl TraceExporterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OtlpGrpc => "otlp_grpc",
            Self::OtlpHttp => "otlp_http",
        }
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::OtlpGrpc => DEFAULT_OTEL_TRACE_GRPC_ENDPOINT,
            Self::OtlpHttp => DEFAULT_OTEL_TRACE_HTTP_ENDPOINT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSinkConfig {
    pub kind: TraceExporterKind,
    pub endpoint: String,
}

pub fn parse_trace_exporter_kind(raw: &str) -> Option<TraceExporterKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "otlp_grpc" | "otlp-grpc" | "grpc" => Some(TraceExporterKind::OtlpGrpc),
        "otlp_http" | "otlp-http" | "http" => Some(TraceExporterKind::OtlpHttp),
        _ => None,
    }
}

pub fn parse_http_protocol(raw: &str) -> Protocol {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Protocol::HttpJson,
        _ => Protocol::HttpBinary,
    }
}

/// Parses `<kind>=<endpoint>[,<kind>=<endpoint>...]`. Bad entries are
/// returned as reasons instead of aborting the whole list.
pub fn parse_trace_sinks_spec(spec: &str) -> (Vec<TraceSinkConfig>, Vec<String>) {
    let mut sinks = Vec::new();
    let mut invalid = Vec::new();

    for token in spec.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let Some((kind_raw, endpoint_raw)) = token.split_once('=') else {
            invalid.push(format!("missing '=' in '{token}'"));
            continue;
        };
        let Some(kind) = parse_trace_exporter_kind(kind_raw) else {
            invalid.push(format!("unknown exporter kind '{kind_raw}'"));
            continue;
        };
        let endpoint = endpoint_raw.trim();
        if endpoint.is_empty() {
            invalid.push(format!("empty endpoint for '{kind_raw}'"));
            continue;
        }
        sinks.push(TraceSinkConfig { kind, endpoint: endpoint.to_string() });
    }

    (sinks, invalid)
}

/// Resolves trace sinks from a multi-sink list, falling back to the single
/// exporter/endpoint pair. Returns the sinks and any warnings to report once
/// logging is up.
pub fn resolve_trace_sinks(
    trace_enabled: bool,
    sinks_spec: Option<&str>,
    exporter: Option<&str>,
    endpoint: Option<&str>,
) -> (Vec<TraceSinkConfig>, Vec<String>) {
    if !trace_enabled {
        return (Vec::new(), Vec::new());
    }

    let mut warnings = Vec::new();
    if let Some(spec) = sinks_spec.map(str::trim).filter(|spec| !spec.is_empty()) {
        let (sinks, invalid) = parse_trace_sinks_spec(spec);
        warnings.extend(invalid.into_iter().map(|reason| {
            format!(
                "ignoring invalid ML_OTEL_TRACE_EXPORTERS entry ({reason}); expected <otlp_grpc|otlp_http>=<endpoint>"
            )
        }));
        if !sinks.is_empty() {
            return (sinks, warnings);
        }
        warnings.push(
            "ML_OTEL_TRACE_EXPORTERS yielded no valid sinks; using ML_OTEL_TRACE_EXPORTER".to_string(),
        );
    }

    let kind = exporter.and_then(parse_trace_exporter_kind).unwrap_or(TraceExporterKind::OtlpGrpc);
    let endpoint = endpoint
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .unwrap_or_else(|| kind.default_endpoint())
        .to_string();
    (vec![TraceSinkConfig { kind, endpoint }], warnings)
}

/// Builds one exporter per sink. A sink that fails to build is reported and
/// skipped; tracing export never blocks startup.
pub fn build_trace_exporters(
    trace_sinks: &[TraceSinkConfig],
    trace_timeout: Duration,
    trace_http_protocol: Protocol,
) -> (Vec<SpanExporter>, Vec<String>) {
    let mut exporters = Vec::new();
    let mut failures = Vec::new();

    for sink in trace_sinks {
        let built = match sink.kind {
            TraceExporterKind::OtlpGrpc => SpanExporter::builder()
                .with_tonic()
                .with_endpoint(sink.endpoint.clone())
                .with_timeout(trace_timeout)
                .build(),
            TraceExporterKind::OtlpHttp => SpanExporter::builder()
                .with_http()
                .with_endpoint(sink.endpoint.clone())
                .with_timeout(trace_timeout)
                .with_protocol(trace_http_protocol)
                .build(),
        };

        match built {
            Ok(exporter) => exporters.push(exporter),
            Err(error) => failures.push(format!(
                "failed to initialize OTLP trace exporter (kind={}, endpoint={}): {error}",
                sink.kind.as_str(),
                sink.endpoint
            )),
        }
    }

    (exporters, failures)
}
