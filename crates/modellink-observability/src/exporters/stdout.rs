use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogExporterKind {
    Stdout,
    None,
}

pub fn parse_log_exporter_kind(raw: &str) -> LogExporterKind {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" | "off" => LogExporterKind::None,
        _ => LogExporterKind::Stdout,
    }
}

/// Span open/close lines are noisy; per-stage timings only show up when asked for.
pub fn span_events_mask(log_span_events: bool) -> FmtSpan {
    if log_span_events { FmtSpan::NEW | FmtSpan::CLOSE } else { FmtSpan::NONE }
}
