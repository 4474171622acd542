//! Logging and telemetry infrastructure for ensemble.
//!
//! Structured logging is built on `tracing`; the orchestrator never
//! talks to a global logger directly. Instead it receives a
//! [`TelemetrySink`] at construction, and the default sink forwards to
//! `tracing`. This keeps process-wide lifetime with explicit ownership.

use chrono::{DateTime, Utc};
use tracing::{Level, debug, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the tracing subscriber for structured logging.
///
/// Honors `RUST_LOG` when set; otherwise defaults to `ensemble=info`
/// (or `ensemble=debug` when `verbose` is true).
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("ensemble=debug,info")
            } else {
                EnvFilter::try_new("ensemble=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}

/// Create a span for one phase execution with structured fields.
pub fn phase_span(solution: &str, phase: &str, environment: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "phase_execution",
        solution = solution,
        phase = phase,
        environment = environment,
    )
}

/// Structured description of one phase or plugin invocation.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Solution being operated on.
    pub solution: String,
    /// Lifecycle phase name.
    pub phase: String,
    /// Target environment name.
    pub environment: String,
    /// Plugin name, when the event concerns a single invocation rather
    /// than the whole phase.
    pub plugin: Option<String>,
    /// When the event was emitted.
    pub at: DateTime<Utc>,
}

impl TelemetryEvent {
    #[must_use]
    pub fn phase_level(solution: &str, phase: &str, environment: &str) -> Self {
        Self {
            solution: solution.to_string(),
            phase: phase.to_string(),
            environment: environment.to_string(),
            plugin: None,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn for_plugin(&self, plugin: &str) -> Self {
        Self {
            plugin: Some(plugin.to_string()),
            at: Utc::now(),
            ..self.clone()
        }
    }

    fn target(&self) -> String {
        match &self.plugin {
            Some(p) => format!("{}/{}[{}]", self.phase, p, self.environment),
            None => format!("{}[{}]", self.phase, self.environment),
        }
    }
}

/// Injected logging/telemetry port.
///
/// Emits the before/after line pair around every guarded invocation:
/// start, then success-with-summary or failure-with-summary. The sink
/// is an external collaborator; the engine only calls these hooks.
pub trait TelemetrySink: Send + Sync {
    fn started(&self, event: &TelemetryEvent);
    fn succeeded(&self, event: &TelemetryEvent, summary: &str);
    fn failed(&self, event: &TelemetryEvent, error: &str, summary: &str);
}

/// Default sink: forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn started(&self, event: &TelemetryEvent) {
        debug!(target: "ensemble", solution = %event.solution, "{} started", event.target());
    }

    fn succeeded(&self, event: &TelemetryEvent, summary: &str) {
        info!(target: "ensemble", solution = %event.solution, "{} ok: {summary}", event.target());
    }

    fn failed(&self, event: &TelemetryEvent, error: &str, summary: &str) {
        error!(
            target: "ensemble",
            solution = %event.solution,
            "{} failed: {error} (committed so far: {summary})",
            event.target()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl TelemetrySink for RecordingSink {
        fn started(&self, event: &TelemetryEvent) {
            self.lines.lock().unwrap().push(format!("start {}", event.target()));
        }
        fn succeeded(&self, event: &TelemetryEvent, summary: &str) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("ok {} {summary}", event.target()));
        }
        fn failed(&self, event: &TelemetryEvent, error: &str, _summary: &str) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("fail {} {error}", event.target()));
        }
    }

    #[test]
    fn event_targets_name_phase_and_plugin() {
        let phase = TelemetryEvent::phase_level("my-app", "provision", "dev");
        assert_eq!(phase.target(), "provision[dev]");
        let plugin = phase.for_plugin("bot");
        assert_eq!(plugin.target(), "provision/bot[dev]");
        assert_eq!(plugin.solution, "my-app");
    }

    #[test]
    fn sink_receives_before_and_after() {
        let sink = RecordingSink::default();
        let event = TelemetryEvent::phase_level("my-app", "deploy", "prod");
        sink.started(&event);
        sink.succeeded(&event, "2 plugins");
        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.as_slice(), ["start deploy[prod]", "ok deploy[prod] 2 plugins"]);
    }
}
