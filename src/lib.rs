//! ensemble - Lifecycle orchestration for multi-resource solutions
//!
//! This crate coordinates the provisioning lifecycle of a composite
//! application made of independently-developed resource units (a web
//! frontend, a bot, a serverless function, ...) under a single
//! solution. Individual resource logic lives in pluggable units; the
//! engine's job is orchestration: capability discovery, dependency
//! ordering, tier-parallel scheduling, settings/state propagation
//! between plugins, result/error aggregation, and merging interactive
//! question trees.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! ensemble = "0.3"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ensemble::{
//!     EnvironmentDescriptor, LifecycleOrchestrator, LifecyclePhase, PluginRegistry,
//!     RunOptions, SolutionContext, StateStore,
//! };
//!
//! # async fn demo(my_plugin: Arc<dyn ensemble::ResourcePlugin>) -> anyhow::Result<()> {
//! let mut registry = PluginRegistry::new();
//! registry.register(my_plugin)?;
//!
//! let orchestrator =
//!     LifecycleOrchestrator::new(Arc::new(registry), Arc::new(StateStore::in_memory()));
//!
//! let outcome = orchestrator
//!     .run_phase(
//!         LifecyclePhase::Create,
//!         &SolutionContext::new("my-app"),
//!         &EnvironmentDescriptor::new("dev"),
//!         &["frontend".to_string()],
//!         RunOptions::default(),
//!     )
//!     .await;
//!
//! match outcome {
//!     Ok(result) => println!("{}", result.summary()),
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees
//!
//! - Plugins never start before their in-subset dependencies commit.
//! - State committed by completed plugins is never lost: every phase
//!   error carries the partial result.
//! - Every failure callers observe is classified (user vs system);
//!   cycles, ordering violations, and duplicate question paths abort
//!   before any plugin runs.

pub use ensemble_doctor::{
    DependencySequencer, DependencyStatus, SequencerReport, ToolchainSequencer,
};
pub use ensemble_orchestrator::{
    CancelHandle, LifecycleOrchestrator, LifecycleResult, PhaseError, PluginReport, PluginStatus,
    RunOptions, SolutionContext,
};
pub use ensemble_plugin_api::{
    CommonConfig, CredentialProvider, EnvironmentDescriptor, InvocationScope, PluginContext,
    PluginOutput, ResourcePlugin, Settings, invoke_phase,
};
pub use ensemble_questions::{
    Answers, AnswerValue, MergedQuestions, QuestionKind, QuestionNode, merge_question_trees,
};
pub use ensemble_registry::{PluginDescriptor, PluginRegistry, tiers, topo_sort};
pub use ensemble_store::{
    EnvDocument, JsonFileBackend, MemoryBackend, PersistenceBackend, StateStore,
};
pub use ensemble_utils::error::{EnsembleError, ErrorKind, SystemError, UserError};
pub use ensemble_utils::logging::{TelemetryEvent, TelemetrySink, TracingSink, init_tracing};
pub use ensemble_utils::types::{Capability, CapabilitySet, LifecyclePhase, ToolKind};
