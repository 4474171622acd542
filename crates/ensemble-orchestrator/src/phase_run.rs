//! Single-phase execution: precondition checks, question merge,
//! dependency ordering, tier-parallel scheduling, and commit handling.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use ensemble_plugin_api::{
    EnvironmentDescriptor, InvocationScope, PluginContext, PluginOutput, ResourcePlugin,
    invoke_phase,
};
use ensemble_questions::merge_question_trees;
use ensemble_registry::{tiers, topo_sort};
use ensemble_utils::error::{EnsembleError, SystemError, UserError};
use ensemble_utils::logging::TelemetryEvent;
use ensemble_utils::types::{Capability, LifecyclePhase, ToolKind};

use crate::report::{LifecycleResult, PhaseError, PluginReport, PluginStatus};
use crate::{LifecycleOrchestrator, RunOptions, SolutionContext};

/// Why a plugin was never invoked.
enum BlockCause {
    Dependency(String),
    MissingTool(ToolKind),
    Cancelled,
    FastFail,
}

impl BlockCause {
    fn describe(&self) -> String {
        match self {
            Self::Dependency(dep) => format!("dependency '{dep}' did not complete"),
            Self::MissingTool(tool) => format!("required tool '{tool}' is not installed"),
            Self::Cancelled => "phase cancelled before this plugin was admitted".to_string(),
            Self::FastFail => "scheduling halted by fast-fail".to_string(),
        }
    }
}

impl LifecycleOrchestrator {
    /// Executes `phase` for `solution` in `environment` over the named
    /// plugin subset.
    ///
    /// On full success, marks the phase complete for this environment
    /// and returns the solution-wide aggregate. On failure, returns a
    /// [`PhaseError`] whose partial result holds exactly the values
    /// committed by plugins that completed — never lost, so callers can
    /// inspect what succeeded and resume.
    ///
    /// # Errors
    /// Pre-execution (empty partial): `PhaseOrderError` (precondition
    /// or rejected re-entry), `CyclicDependencyError`,
    /// `DuplicateQuestionIdError`, answer-validation `UserError`.
    /// Mid-execution (partial attached): the originating plugin's
    /// classified error, or `CancelledError`.
    pub async fn run_phase(
        &self,
        phase: LifecyclePhase,
        solution: &SolutionContext,
        environment: &EnvironmentDescriptor,
        subset: &[String],
        options: RunOptions,
    ) -> Result<LifecycleResult, PhaseError> {
        let phase_event = TelemetryEvent::phase_level(&solution.name, phase.as_str(), &environment.name);
        self.telemetry.started(&phase_event);

        match self.run_phase_inner(phase, solution, environment, subset, options).await {
            Ok(result) => {
                self.telemetry.succeeded(&phase_event, &result.summary());
                Ok(result)
            }
            Err(err) => {
                self.telemetry
                    .failed(&phase_event, &err.error.to_string(), &err.partial.summary());
                Err(err)
            }
        }
    }

    async fn run_phase_inner(
        &self,
        phase: LifecyclePhase,
        solution: &SolutionContext,
        environment: &EnvironmentDescriptor,
        subset: &[String],
        options: RunOptions,
    ) -> Result<LifecycleResult, PhaseError> {
        let env = environment.name.as_str();
        let plugins = self.registry.subset(subset).map_err(PhaseError::fatal)?;

        self.check_phase_order(phase, env).map_err(PhaseError::fatal)?;

        // Capability filter: lacking the phase capability is a
        // legitimate no-op, recorded as Skipped.
        let capability = phase.capability();
        let mut result = LifecycleResult::default();
        let eligible: Vec<Arc<dyn ResourcePlugin>> = plugins
            .iter()
            .filter(|p| {
                let has = p.capabilities().contains(capability);
                if !has {
                    result.reports.push(PluginReport::skipped(p.name()));
                }
                has
            })
            .cloned()
            .collect();

        // Question merge runs before any side effect; a duplicate
        // answer path is a registration error and fatal.
        self.validate_questions(phase, &eligible, &options)
            .map_err(PhaseError::fatal)?;

        let ordered = topo_sort(&eligible).map_err(PhaseError::fatal)?;
        let tier_list = tiers(&ordered);

        // Provision precheck: uninstalled tools block exactly the
        // plugins that require them (plus dependents, transitively).
        let mut blocked: BTreeMap<String, BlockCause> = BTreeMap::new();
        let mut first_error: Option<EnsembleError> = None;
        if phase == LifecyclePhase::Provision && !solution.prerequisites.is_empty() {
            let statuses = self
                .sequencer
                .ensure_dependencies(&solution.prerequisites, options.fast_fail)
                .await;
            let missing: BTreeSet<ToolKind> = statuses
                .iter()
                .filter(|s| !s.is_installed)
                .map(|s| s.kind)
                .collect();
            for plugin in &ordered {
                if let Some(tool) = plugin.required_tools().iter().find(|t| missing.contains(t)) {
                    blocked.insert(plugin.name().to_string(), BlockCause::MissingTool(*tool));
                    if first_error.is_none() {
                        first_error = Some(
                            UserError::ToolNotInstalled {
                                tool: tool.to_string(),
                                plugin: plugin.name().to_string(),
                            }
                            .into(),
                        );
                    }
                }
            }
        }

        let mut statuses: BTreeMap<String, PluginStatus> = BTreeMap::new();
        let mut cancelled = false;

        'tiers: for (tier_index, tier) in tier_list.iter().enumerate() {
            if options.cancel.as_ref().is_some_and(super::CancelHandle::is_cancelled) {
                cancelled = true;
                for plugin in names_from_tier(&tier_list, tier_index) {
                    blocked.entry(plugin).or_insert(BlockCause::Cancelled);
                }
                break 'tiers;
            }
            if options.fast_fail && first_error.is_some() {
                for plugin in names_from_tier(&tier_list, tier_index) {
                    blocked.entry(plugin).or_insert(BlockCause::FastFail);
                }
                break 'tiers;
            }

            // Split the tier into runnable members and members blocked
            // by an unfinished dependency or a precheck.
            let mut runnable: Vec<Arc<dyn ResourcePlugin>> = Vec::new();
            for plugin in tier {
                let name = plugin.name().to_string();
                if blocked.contains_key(&name) {
                    continue;
                }
                let failed_dep = plugin.dependencies().into_iter().find(|dep| {
                    blocked.contains_key(dep)
                        || statuses.get(dep).is_some_and(|s| *s == PluginStatus::Failed)
                });
                if let Some(dep) = failed_dep {
                    blocked.insert(name, BlockCause::Dependency(dep));
                } else {
                    runnable.push(plugin.clone());
                }
            }

            // Snapshots taken once per tier: members never observe a
            // sibling's in-flight output, and the next tier sees all
            // fully-committed prior-tier values.
            let mut outcomes = self
                .run_tier(phase, solution, environment, &runnable, &options)
                .await
                .map_err(|e| PhaseError {
                    error: e,
                    partial: result.clone(),
                })?;

            for plugin in &runnable {
                let name = plugin.name().to_string();
                match outcomes.remove(&name) {
                    Some(Ok(output)) => {
                        self.store
                            .commit(env, &name, &output)
                            .map_err(|e| PhaseError {
                                error: e,
                                partial: result.clone(),
                            })?;
                        result.absorb(&name, &output);
                        statuses.insert(name, PluginStatus::Succeeded);
                    }
                    Some(Err(e)) => {
                        result.reports.push(PluginReport::failed(&name, &e.to_string()));
                        statuses.insert(name.clone(), PluginStatus::Failed);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        debug!(plugin = %name, "plugin failed; dependents will be blocked");
                    }
                    None => {
                        // The invocation task vanished without a result:
                        // the boundary guard attributes it as a panic.
                        let e: EnsembleError = SystemError::InvocationPanicked {
                            plugin: name.clone(),
                            phase: phase.as_str().to_string(),
                        }
                        .into();
                        result.reports.push(PluginReport::failed(&name, &e.to_string()));
                        statuses.insert(name, PluginStatus::Failed);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
        }

        // Succeeded reports, in dependency order for determinism.
        for plugin in &ordered {
            if statuses.get(plugin.name()) == Some(&PluginStatus::Succeeded) {
                result.reports.push(PluginReport::succeeded(plugin.name()));
            }
        }
        for (name, cause) in &blocked {
            result.reports.push(PluginReport::blocked(name, &cause.describe()));
        }

        if cancelled {
            return Err(PhaseError {
                error: EnsembleError::Cancelled {
                    committed: result.committed_count(),
                },
                partial: result,
            });
        }
        if let Some(error) = first_error {
            return Err(PhaseError {
                error,
                partial: result,
            });
        }

        self.store
            .mark_phase_complete(env, phase)
            .map_err(|e| PhaseError {
                error: e,
                partial: result.clone(),
            })?;
        Ok(result)
    }

    /// Precondition: predecessor complete, and no re-entry into an
    /// already-completed phase (callers reset the marker explicitly to
    /// re-run).
    fn check_phase_order(&self, phase: LifecyclePhase, env: &str) -> Result<(), EnsembleError> {
        if self.store.is_phase_complete(env, phase)? {
            return Err(EnsembleError::PhaseOrder {
                phase: phase.as_str().to_string(),
                environment: env.to_string(),
                reason: format!(
                    "phase '{phase}' is already complete; reset it to run again"
                ),
            });
        }
        if let Some(required) = phase.predecessor()
            && !self.store.is_phase_complete(env, required)?
        {
            return Err(EnsembleError::PhaseOrder {
                phase: phase.as_str().to_string(),
                environment: env.to_string(),
                reason: format!("phase '{required}' has not completed"),
            });
        }
        Ok(())
    }

    /// Merges eligible plugins' question subtrees and validates the
    /// supplied answers against the merged tree.
    fn validate_questions(
        &self,
        phase: LifecyclePhase,
        eligible: &[Arc<dyn ResourcePlugin>],
        options: &RunOptions,
    ) -> Result<(), EnsembleError> {
        let subtrees: Vec<(String, _)> = eligible
            .iter()
            .filter(|p| p.capabilities().contains(Capability::Questions))
            .filter_map(|p| p.questions(phase).map(|tree| (p.name().to_string(), tree)))
            .collect();
        if subtrees.is_empty() {
            return Ok(());
        }
        let merged = merge_question_trees(subtrees)?;
        merged.validate_answers(&options.answers)
    }

    /// Spawns one tier's invocations and gathers their guarded results.
    ///
    /// Each invocation runs on its own task with a boundary guard: the
    /// plugin's error is normalized into a classified engine error, and
    /// a panic is contained and reported as `SystemError`. Only
    /// snapshot reads happen here; commits are the caller's job so that
    /// a failed invocation commits nothing.
    async fn run_tier(
        &self,
        phase: LifecyclePhase,
        solution: &SolutionContext,
        environment: &EnvironmentDescriptor,
        runnable: &[Arc<dyn ResourcePlugin>],
        options: &RunOptions,
    ) -> Result<BTreeMap<String, Result<PluginOutput, EnsembleError>>, EnsembleError> {
        let env = environment.name.as_str();
        let common_settings = self.store.settings_snapshot(env)?;
        let state_snapshot = self.store.state_snapshot(env)?;

        // The credential handle is exposed only where the phase needs
        // it (Provision/Deploy); other phases see the environment
        // without it.
        let scoped_env = if matches!(phase, LifecyclePhase::Provision | LifecyclePhase::Deploy) {
            environment.clone()
        } else {
            let mut stripped = environment.clone();
            stripped.credentials = None;
            stripped
        };

        let mut join: JoinSet<(String, Result<PluginOutput, EnsembleError>)> = JoinSet::new();
        for plugin in runnable {
            let name = plugin.name().to_string();
            let settings = self.store.settings_of(env, &name)?;
            let mut common_config = common_settings.clone();
            common_config.remove(&name);
            let ctx = PluginContext {
                solution: solution.name.clone(),
                scope: InvocationScope::Phase(phase),
                environment: scoped_env.clone(),
                settings,
                common_config,
                sibling_state: state_snapshot.clone(),
                answers: options.answers.clone(),
            };
            let plugin = plugin.clone();
            let sink = self.telemetry.clone();
            let event = TelemetryEvent::phase_level(&solution.name, phase.as_str(), env)
                .for_plugin(&name);

            join.spawn(async move {
                sink.started(&event);
                // Inner spawn so a panicking plugin is contained here
                // and attributed, instead of surfacing as an anonymous
                // join error on the tier.
                let guarded = tokio::spawn({
                    let plugin = plugin.clone();
                    let ctx = ctx.clone();
                    async move { invoke_phase(plugin.as_ref(), phase, &ctx).await }
                });
                let result = match guarded.await {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(e)) => Err(EnsembleError::normalize(e, &name)),
                    Err(join_err) if join_err.is_panic() => Err(SystemError::InvocationPanicked {
                        plugin: name.clone(),
                        phase: phase.as_str().to_string(),
                    }
                    .into()),
                    Err(_) => Err(SystemError::Uncaught {
                        source_name: name.clone(),
                        detail: "invocation task aborted".to_string(),
                    }
                    .into()),
                };
                match &result {
                    Ok(output) => {
                        let values = output.resource_values.len() + output.state_values.len();
                        sink.succeeded(&event, &format!("{values} value(s)"));
                    }
                    Err(e) => sink.failed(&event, &e.to_string(), "nothing committed"),
                }
                (name, result)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = join.join_next().await {
            if let Ok((name, result)) = joined {
                outcomes.insert(name, result);
            }
            // An Err here means the guard task itself panicked; the
            // missing entry is attributed by the caller.
        }
        Ok(outcomes)
    }
}

/// Names of every plugin in tier `start` and all later tiers.
fn names_from_tier(tier_list: &[Vec<Arc<dyn ResourcePlugin>>], start: usize) -> Vec<String> {
    tier_list[start..]
        .iter()
        .flat_map(|t| t.iter().map(|p| p.name().to_string()))
        .collect()
}
