pub mod otlp;
pub mod stdout;
