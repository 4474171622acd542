//! Result and error aggregation for phase execution.
//!
//! Per-plugin outputs merge into a solution-wide result under
//! deterministic plugin-name-prefixed keys, so two plugins emitting the
//! same key never collide. The partial aggregate travels with every
//! phase-level error: callers can always report what succeeded
//! alongside what failed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use ensemble_plugin_api::PluginOutput;
use ensemble_utils::error::EnsembleError;

/// Outcome of one plugin within a phase invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Invoked and committed.
    Succeeded,
    /// Invoked and returned an error; nothing committed.
    Failed,
    /// Never invoked: a dependency failed, a required tool is missing,
    /// the run was cancelled, or fast-fail halted scheduling.
    Blocked,
    /// Not eligible for this phase (capability absent); a legitimate
    /// no-op, not an error.
    Skipped,
}

/// Per-plugin record in a [`LifecycleResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginReport {
    pub plugin: String,
    pub status: PluginStatus,
    /// Failure or block reason, when status is Failed/Blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginReport {
    #[must_use]
    pub fn succeeded(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            status: PluginStatus::Succeeded,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(plugin: &str, error: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            status: PluginStatus::Failed,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn blocked(plugin: &str, reason: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            status: PluginStatus::Blocked,
            error: Some(reason.to_string()),
        }
    }

    #[must_use]
    pub fn skipped(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            status: PluginStatus::Skipped,
            error: None,
        }
    }
}

/// Solution-wide aggregate of a phase invocation.
///
/// Keys are `"<plugin>.<key>"`. On success this is the whole outcome;
/// on failure the same shape rides inside [`PhaseError`] as the
/// partial result, containing exactly the values committed by plugins
/// that completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleResult {
    pub resource_values: BTreeMap<String, String>,
    pub state_values: BTreeMap<String, String>,
    pub reports: Vec<PluginReport>,
}

impl LifecycleResult {
    /// Merges one plugin's committed output under its namespace.
    pub fn absorb(&mut self, plugin: &str, output: &PluginOutput) {
        for (key, value) in &output.resource_values {
            self.resource_values.insert(format!("{plugin}.{key}"), value.clone());
        }
        for (key, value) in &output.state_values {
            self.state_values.insert(format!("{plugin}.{key}"), value.clone());
        }
    }

    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == PluginStatus::Succeeded)
            .count()
    }

    /// One-line summary for telemetry: counts per status.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut counts = [0usize; 4];
        for report in &self.reports {
            let slot = match report.status {
                PluginStatus::Succeeded => 0,
                PluginStatus::Failed => 1,
                PluginStatus::Blocked => 2,
                PluginStatus::Skipped => 3,
            };
            counts[slot] += 1;
        }
        format!(
            "{} succeeded, {} failed, {} blocked, {} skipped",
            counts[0], counts[1], counts[2], counts[3]
        )
    }
}

/// A phase-level failure carrying the partial result.
///
/// `error` is the originating classified failure; `partial` holds the
/// state values produced by plugins that did complete, which are never
/// lost. For fatal pre-execution errors (ordering, cycle, duplicate
/// question) the partial result is empty by construction.
#[derive(Debug)]
pub struct PhaseError {
    pub error: EnsembleError,
    pub partial: LifecycleResult,
}

impl PhaseError {
    #[must_use]
    pub fn fatal(error: EnsembleError) -> Self {
        Self {
            error,
            partial: LifecycleResult::default(),
        }
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.partial.summary())
    }
}

impl std::error::Error for PhaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_prefixes_keys_with_plugin_name() {
        let mut result = LifecycleResult::default();
        let identity = PluginOutput::default().with_state_value("client-id", "abc");
        let bot = PluginOutput::default().with_state_value("client-id", "xyz");

        result.absorb("identity", &identity);
        result.absorb("bot", &bot);

        // Same plugin key, no collision after prefixing.
        assert_eq!(result.state_values["identity.client-id"], "abc");
        assert_eq!(result.state_values["bot.client-id"], "xyz");
    }

    #[test]
    fn summary_counts_statuses() {
        let mut result = LifecycleResult::default();
        result.reports.push(PluginReport::succeeded("a"));
        result.reports.push(PluginReport::failed("b", "boom"));
        result.reports.push(PluginReport::blocked("c", "dependency 'b' failed"));
        assert_eq!(result.summary(), "1 succeeded, 1 failed, 1 blocked, 0 skipped");
        assert_eq!(result.committed_count(), 1);
    }

    #[test]
    fn phase_error_displays_error_and_summary() {
        let err = PhaseError::fatal(EnsembleError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        });
        let text = err.to_string();
        assert!(text.contains("a -> b -> a"));
        assert!(text.contains("0 succeeded"));
    }
}
