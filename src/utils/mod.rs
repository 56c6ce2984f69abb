//! Process-level helpers: startup wiring and OpenTelemetry instruments.

pub mod bootstrap;
pub mod metrics;
