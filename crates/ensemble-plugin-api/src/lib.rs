//! Plugin contract for the ensemble lifecycle engine.
//!
//! This crate provides the shared contract between the orchestrator and
//! resource-plugin implementations. It contains the minimal types
//! needed for plugin invocation without introducing circular
//! dependencies: the [`ResourcePlugin`] trait, the scoped
//! [`PluginContext`] each invocation receives, and the
//! [`PluginOutput`] each capability method returns.
//!
//! # Capability dispatch
//!
//! A plugin implements only the lifecycle capabilities relevant to it
//! and declares them via [`ResourcePlugin::capabilities`]. The
//! orchestrator checks the capability bitset before scheduling, so an
//! unimplemented method is never invoked; the default method bodies
//! exist only to keep the trait ergonomic and fail loudly if a plugin
//! declares a capability without overriding the matching method.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ensemble_questions::{Answers, QuestionNode};
use ensemble_utils::types::{CapabilitySet, LifecyclePhase, ToolKind};

/// Opaque credential/token provider handle.
///
/// Created by the caller, passed through the context unchanged. The
/// engine never inspects or caches what is behind it; only plugins
/// that provision or deploy cloud resources downcast it to whatever
/// concrete provider the front end supplied.
pub trait CredentialProvider: Send + Sync {
    /// Stable provider name, for diagnostics only.
    fn provider_name(&self) -> &str;
}

/// A named deployment target ("dev", "prod", ...).
///
/// Carries environment-scoped variables and the opaque credential
/// handle. Lives for the duration of one invoked phase.
#[derive(Clone)]
pub struct EnvironmentDescriptor {
    pub name: String,
    pub variables: BTreeMap<String, String>,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
}

impl EnvironmentDescriptor {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            variables: BTreeMap::new(),
            credentials: None,
        }
    }

    #[must_use]
    pub fn with_variable(mut self, key: &str, value: &str) -> Self {
        self.variables.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

impl fmt::Debug for EnvironmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentDescriptor")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|c| c.provider_name()),
            )
            .finish()
    }
}

/// Per-plugin, per-environment settings map (inputs).
pub type Settings = BTreeMap<String, String>;

/// Read-only projection of sibling plugins' settings, keyed by plugin
/// name. A snapshot taken at phase start, never live-updated mid-phase.
pub type CommonConfig = BTreeMap<String, Settings>;

/// Values a plugin produces from one capability invocation.
///
/// `resource_values` describe the provisioned resource itself
/// (endpoints, ids); `state_values` are execution outputs carried
/// forward to later phases. Both are committed to the store only if
/// the invocation returns success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOutput {
    pub resource_values: BTreeMap<String, String>,
    pub state_values: BTreeMap<String, String>,
}

impl PluginOutput {
    #[must_use]
    pub fn with_resource_value(mut self, key: &str, value: &str) -> Self {
        self.resource_values.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_state_value(mut self, key: &str, value: &str) -> Self {
        self.state_values.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_values.is_empty() && self.state_values.is_empty()
    }
}

/// What a plugin invocation is running for: a lifecycle phase or a
/// user-invoked custom task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationScope {
    Phase(LifecyclePhase),
    Task(String),
}

impl InvocationScope {
    /// The lifecycle phase, when this invocation belongs to one.
    #[must_use]
    pub const fn phase(&self) -> Option<LifecyclePhase> {
        match self {
            Self::Phase(phase) => Some(*phase),
            Self::Task(_) => None,
        }
    }
}

/// Scoped context passed to every plugin invocation.
///
/// Exposes exactly what the plugin may see: its own settings, a
/// read-only snapshot of sibling settings, the environment, the merged
/// answers for interactive phases, and (for Provision/Deploy) the
/// credential handle via the environment. Plugins must not perform
/// cross-plugin I/O except through [`PluginContext::common_config`].
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Solution the phase is running for.
    pub solution: String,
    /// Phase or custom task being executed.
    pub scope: InvocationScope,
    /// Target environment, including the opaque credential handle.
    pub environment: EnvironmentDescriptor,
    /// The plugin's own settings for this environment.
    pub settings: Settings,
    /// Snapshot of other plugins' settings, keyed by plugin name.
    pub common_config: CommonConfig,
    /// Snapshot of state committed by earlier phases/tiers, keyed by
    /// plugin name.
    pub sibling_state: CommonConfig,
    /// Flat answers collected from the merged question tree.
    pub answers: Answers,
}

impl PluginContext {
    /// Looks up a sibling plugin's setting, e.g. the identity plugin's
    /// client id.
    #[must_use]
    pub fn sibling_setting(&self, plugin: &str, key: &str) -> Option<&str> {
        self.common_config
            .get(plugin)
            .and_then(|settings| settings.get(key))
            .map(String::as_str)
    }

    /// Looks up a sibling plugin's committed state value.
    #[must_use]
    pub fn sibling_state_value(&self, plugin: &str, key: &str) -> Option<&str> {
        self.sibling_state
            .get(plugin)
            .and_then(|state| state.get(key))
            .map(String::as_str)
    }
}

macro_rules! unimplemented_capability {
    ($self:ident, $cap:literal) => {
        bail!(
            "plugin '{}' declares the {} capability but does not implement it",
            $self.name(),
            $cap
        )
    };
}

/// Core trait implemented by every resource plugin.
///
/// All capability methods are optional in the sense that the
/// orchestrator only calls those the plugin declares in
/// [`capabilities`](Self::capabilities). Each returns the values to
/// commit on success; returning an error commits nothing from this
/// invocation.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// Unique plugin name; also the namespace for its settings, state,
    /// and question subtree.
    fn name(&self) -> &str;

    /// Human-readable name for reports.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Capability bitset consulted before scheduling.
    fn capabilities(&self) -> CapabilitySet;

    /// Names of plugins this plugin depends on for ordering. Edges to
    /// plugins outside the invoked subset are ignored.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Local toolchain prerequisites that must be installed before
    /// this plugin may provision.
    fn required_tools(&self) -> Vec<ToolKind> {
        Vec::new()
    }

    /// Question subtree for an interactive phase, if any.
    ///
    /// Only consulted for plugins declaring the `Questions` capability.
    fn questions(&self, _phase: LifecyclePhase) -> Option<QuestionNode> {
        None
    }

    async fn scaffold(&self, _ctx: &PluginContext) -> Result<PluginOutput> {
        unimplemented_capability!(self, "scaffold")
    }

    async fn provision(&self, _ctx: &PluginContext) -> Result<PluginOutput> {
        unimplemented_capability!(self, "provision")
    }

    async fn configure(&self, _ctx: &PluginContext) -> Result<PluginOutput> {
        unimplemented_capability!(self, "configure")
    }

    async fn build(&self, _ctx: &PluginContext) -> Result<PluginOutput> {
        unimplemented_capability!(self, "build")
    }

    async fn deploy(&self, _ctx: &PluginContext) -> Result<PluginOutput> {
        unimplemented_capability!(self, "deploy")
    }

    async fn publish(&self, _ctx: &PluginContext) -> Result<PluginOutput> {
        unimplemented_capability!(self, "publish")
    }

    /// User-invoked custom task outside the fixed phase order.
    async fn execute_task(&self, task: &str, _ctx: &PluginContext) -> Result<PluginOutput> {
        bail!("plugin '{}' has no custom task '{task}'", self.name())
    }
}

impl fmt::Debug for dyn ResourcePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePlugin")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Dispatches the capability method matching `phase`.
///
/// Callers must have already checked the plugin's capability bitset;
/// dispatching to an undeclared capability reaches the default method
/// body and fails.
///
/// # Errors
/// Whatever the plugin's method returns.
pub async fn invoke_phase(
    plugin: &dyn ResourcePlugin,
    phase: LifecyclePhase,
    ctx: &PluginContext,
) -> Result<PluginOutput> {
    match phase {
        LifecyclePhase::Create => plugin.scaffold(ctx).await,
        LifecyclePhase::Provision => plugin.provision(ctx).await,
        LifecyclePhase::Configure => plugin.configure(ctx).await,
        LifecyclePhase::Build => plugin.build(ctx).await,
        LifecyclePhase::Deploy => plugin.deploy(ctx).await,
        LifecyclePhase::Publish => plugin.publish(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_utils::types::Capability;

    struct StubIdentity;

    #[async_trait]
    impl ResourcePlugin for StubIdentity {
        fn name(&self) -> &str {
            "identity"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::from_slice(&[Capability::Provision])
        }

        async fn provision(&self, ctx: &PluginContext) -> Result<PluginOutput> {
            assert_eq!(ctx.scope.phase(), Some(LifecyclePhase::Provision));
            Ok(PluginOutput::default().with_state_value("client-id", "abc-123"))
        }
    }

    fn ctx(phase: LifecyclePhase) -> PluginContext {
        PluginContext {
            solution: "demo".into(),
            scope: InvocationScope::Phase(phase),
            environment: EnvironmentDescriptor::new("dev"),
            settings: Settings::new(),
            common_config: CommonConfig::new(),
            sibling_state: CommonConfig::new(),
            answers: Answers::new(),
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_declared_capability() {
        let plugin = StubIdentity;
        let out = invoke_phase(&plugin, LifecyclePhase::Provision, &ctx(LifecyclePhase::Provision))
            .await
            .unwrap();
        assert_eq!(out.state_values["client-id"], "abc-123");
    }

    #[tokio::test]
    async fn dispatch_to_unimplemented_method_fails_loudly() {
        let plugin = StubIdentity;
        let err = invoke_phase(&plugin, LifecyclePhase::Deploy, &ctx(LifecyclePhase::Deploy))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not implement"));
    }

    #[test]
    fn sibling_views_are_keyed_by_plugin() {
        let mut ctx = ctx(LifecyclePhase::Configure);
        ctx.common_config
            .entry("identity".into())
            .or_default()
            .insert("tenant".into(), "contoso".into());
        ctx.sibling_state
            .entry("identity".into())
            .or_default()
            .insert("client-id".into(), "abc-123".into());

        assert_eq!(ctx.sibling_setting("identity", "tenant"), Some("contoso"));
        assert_eq!(ctx.sibling_state_value("identity", "client-id"), Some("abc-123"));
        assert_eq!(ctx.sibling_setting("bot", "tenant"), None);
    }
}
