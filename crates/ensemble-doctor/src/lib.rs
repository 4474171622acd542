//! Local toolchain dependency sequencer.
//!
//! Before a Provision phase, a solution may declare prerequisites on
//! local tools (a runtime, a CLI binary). The sequencer resolves the
//! requested tools in a fixed priority order and reports the install
//! status of each. The orchestrator treats any `is_installed = false`
//! entry as a precondition failure that blocks provisioning for the
//! plugins requiring that tool.
//!
//! The engine ships a probing implementation ([`ToolchainSequencer`])
//! that checks PATH and never installs anything; callers with a real
//! installer inject their own [`DependencySequencer`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ensemble_utils::types::{DependencyStatus, ToolKind};

/// Fixed install/probe priority: runtimes before the tools layered on
/// top of them.
pub const INSTALL_PRIORITY: [ToolKind; 4] = [
    ToolKind::NodeRuntime,
    ToolKind::DotnetSdk,
    ToolKind::FuncCoreTools,
    ToolKind::BicepCli,
];

/// External collaborator contract for resolving toolchain prerequisites.
#[async_trait]
pub trait DependencySequencer: Send + Sync {
    /// Resolves `requested` tools, in the fixed priority order.
    ///
    /// With `fast_fail`, installation stops after the first failure but
    /// every requested tool is still probed and reported, so callers
    /// always see the full status list.
    async fn ensure_dependencies(
        &self,
        requested: &[ToolKind],
        fast_fail: bool,
    ) -> Vec<DependencyStatus>;
}

/// Serializable report wrapper, for status output and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerReport {
    pub schema_version: String,
    pub emitted_at: DateTime<Utc>,
    /// True when every requested tool is installed.
    pub ok: bool,
    pub dependencies: Vec<DependencyStatus>,
}

impl SequencerReport {
    #[must_use]
    pub fn from_statuses(dependencies: Vec<DependencyStatus>) -> Self {
        Self {
            schema_version: "1".to_string(),
            emitted_at: Utc::now(),
            ok: dependencies.iter().all(|d| d.is_installed),
            dependencies,
        }
    }
}

/// Orders requested tools by [`INSTALL_PRIORITY`], dropping duplicates.
#[must_use]
pub fn order_requested(requested: &[ToolKind]) -> Vec<ToolKind> {
    INSTALL_PRIORITY
        .into_iter()
        .filter(|kind| requested.contains(kind))
        .collect()
}

/// PATH-probing sequencer: reports what is installed, installs nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolchainSequencer;

impl ToolchainSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn probe(kind: ToolKind) -> DependencyStatus {
        let command = kind.as_str().to_string();
        match which::which(&command) {
            Ok(path) => DependencyStatus {
                name: kind.display_name().to_string(),
                kind,
                is_installed: true,
                command,
                details: format!("found at {}", path.display()),
                error: None,
            },
            Err(e) => DependencyStatus {
                name: kind.display_name().to_string(),
                kind,
                is_installed: false,
                command: command.clone(),
                details: format!("'{command}' not found on PATH"),
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl DependencySequencer for ToolchainSequencer {
    async fn ensure_dependencies(
        &self,
        requested: &[ToolKind],
        fast_fail: bool,
    ) -> Vec<DependencyStatus> {
        let mut statuses = Vec::new();
        let mut failed = false;
        for kind in order_requested(requested) {
            let mut status = Self::probe(kind);
            if failed && fast_fail && !status.is_installed {
                status.details = format!("{} (installation skipped after earlier failure)", status.details);
            }
            failed |= !status.is_installed;
            statuses.push(status);
        }
        statuses
    }
}
