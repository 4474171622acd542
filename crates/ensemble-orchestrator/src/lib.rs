//! Lifecycle orchestrator: executes one phase for one solution across a
//! chosen environment.
//!
//! The orchestrator asks the registry which plugins support the phase,
//! merges their question trees, orders them by declared dependencies,
//! partitions the order into concurrency tiers, and runs each tier in
//! parallel, committing outputs to the state store only when an
//! invocation succeeds. A failure blocks the failing plugin's
//! transitive dependents while independent branches keep running
//! (unless `fast_fail` halts admission), and the values committed by
//! completed plugins always survive into the returned error.

mod phase_run;
mod report;

pub use report::{LifecycleResult, PhaseError, PluginReport, PluginStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ensemble_doctor::{DependencySequencer, ToolchainSequencer};
use ensemble_plugin_api::{
    EnvironmentDescriptor, InvocationScope, PluginContext, ResourcePlugin,
};
use ensemble_questions::{Answers, MergedQuestions, merge_question_trees};
use ensemble_registry::PluginRegistry;
use ensemble_store::StateStore;
use ensemble_utils::error::{EnsembleError, UserError};
use ensemble_utils::logging::{TelemetryEvent, TelemetrySink, TracingSink};
use ensemble_utils::types::{Capability, LifecyclePhase, ToolKind};

/// Cooperative cancellation handle.
///
/// Signalling stops the orchestrator from admitting new tiers; it never
/// aborts an in-flight plugin invocation. The run returns
/// `CancelledError` carrying everything that had committed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The solution a phase runs against.
#[derive(Debug, Clone, Default)]
pub struct SolutionContext {
    pub name: String,
    /// Local toolchain prerequisites checked before Provision.
    pub prerequisites: Vec<ToolKind>,
}

impl SolutionContext {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prerequisites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_prerequisites(mut self, tools: Vec<ToolKind>) -> Self {
        self.prerequisites = tools;
        self
    }
}

/// Per-run options for [`LifecycleOrchestrator::run_phase`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Halt all further scheduling on the first failure instead of
    /// continuing independent branches. Not-attempted plugins are still
    /// reported as blocked.
    pub fast_fail: bool,
    /// Flat answers from the (external) question front end.
    pub answers: Answers,
    /// Cooperative cancellation signal.
    pub cancel: Option<CancelHandle>,
}

/// Executes lifecycle phases for a solution.
///
/// Construct with [`new`](Self::new) and override the dependency
/// sequencer or telemetry sink as needed; both default to the engine's
/// own implementations (PATH probing, `tracing`).
pub struct LifecycleOrchestrator {
    registry: Arc<PluginRegistry>,
    store: Arc<StateStore>,
    sequencer: Arc<dyn DependencySequencer>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl LifecycleOrchestrator {
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<StateStore>) -> Self {
        Self {
            registry,
            store,
            sequencer: Arc::new(ToolchainSequencer::new()),
            telemetry: Arc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn with_sequencer(mut self, sequencer: Arc<dyn DependencySequencer>) -> Self {
        self.sequencer = sequencer;
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Merges the question subtrees of every `Questions`-capable plugin
    /// in `subset` for the given phase.
    ///
    /// Returns `None` when no eligible plugin contributes questions.
    /// The front end renders the merged tree and produces the flat
    /// answer map passed back through [`RunOptions::answers`].
    ///
    /// # Errors
    /// `UnknownPlugin` for bad names; `DuplicateQuestionIdError` when
    /// two plugins contribute the same fully-qualified answer path.
    pub fn collect_questions(
        &self,
        phase: LifecyclePhase,
        subset: &[String],
    ) -> Result<Option<MergedQuestions>, EnsembleError> {
        let plugins = self.registry.subset(subset)?;
        let subtrees: Vec<(String, _)> = plugins
            .iter()
            .filter(|p| p.capabilities().contains(Capability::Questions))
            .filter_map(|p| p.questions(phase).map(|tree| (p.name().to_string(), tree)))
            .collect();
        if subtrees.is_empty() {
            return Ok(None);
        }
        merge_question_trees(subtrees).map(Some)
    }

    /// Runs a user-invoked custom task on one plugin.
    ///
    /// Custom tasks sit outside the fixed phase order: no ordering
    /// precondition applies, but the invocation is guarded and its
    /// output commits only on success, exactly like a phase invocation.
    ///
    /// # Errors
    /// `PhaseError` with an empty partial result on failure.
    pub async fn run_task(
        &self,
        plugin_name: &str,
        task: &str,
        solution: &SolutionContext,
        environment: &EnvironmentDescriptor,
        answers: Answers,
    ) -> Result<LifecycleResult, PhaseError> {
        let plugin = self
            .registry
            .get(plugin_name)
            .cloned()
            .ok_or_else(|| {
                PhaseError::fatal(
                    UserError::UnknownPlugin {
                        name: plugin_name.to_string(),
                    }
                    .into(),
                )
            })?;
        if !plugin.capabilities().contains(Capability::CustomTask) {
            return Err(PhaseError::fatal(
                UserError::Other {
                    message: format!("plugin '{plugin_name}' declares no custom tasks"),
                }
                .into(),
            ));
        }

        let ctx = self
            .task_context(&plugin, task, solution, environment, answers)
            .map_err(PhaseError::fatal)?;

        let event = TelemetryEvent::phase_level(&solution.name, "task", &environment.name)
            .for_plugin(plugin_name);
        self.telemetry.started(&event);

        let mut result = LifecycleResult::default();
        match plugin.execute_task(task, &ctx).await {
            Ok(output) => {
                if let Err(e) = self.store.commit(&environment.name, plugin_name, &output) {
                    return Err(PhaseError {
                        error: e,
                        partial: result,
                    });
                }
                result.absorb(plugin_name, &output);
                result.reports.push(PluginReport::succeeded(plugin_name));
                self.telemetry.succeeded(&event, &result.summary());
                Ok(result)
            }
            Err(e) => {
                let error = EnsembleError::normalize(e, plugin_name);
                result.reports.push(PluginReport::failed(plugin_name, &error.to_string()));
                self.telemetry.failed(&event, &error.to_string(), &result.summary());
                Err(PhaseError {
                    error,
                    partial: result,
                })
            }
        }
    }

    fn task_context(
        &self,
        plugin: &Arc<dyn ResourcePlugin>,
        task: &str,
        solution: &SolutionContext,
        environment: &EnvironmentDescriptor,
        answers: Answers,
    ) -> Result<PluginContext, EnsembleError> {
        let settings = self.store.settings_of(&environment.name, plugin.name())?;
        let mut common_config = self.store.settings_snapshot(&environment.name)?;
        common_config.remove(plugin.name());
        let sibling_state = self.store.state_snapshot(&environment.name)?;
        Ok(PluginContext {
            solution: solution.name.clone(),
            scope: InvocationScope::Task(task.to_string()),
            environment: environment.clone(),
            settings,
            common_config,
            sibling_state,
            answers,
        })
    }
}
