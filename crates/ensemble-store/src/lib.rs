//! Environment-scoped settings/state store with snapshot reads and
//! commit-on-success writes.
//!
//! Keys are (plugin name, environment, key). Settings are configuration
//! inputs owned by one plugin; State is output produced by execution,
//! namespaced per plugin and never deleted except by explicit reset.
//!
//! Two rules make the store safe under tier-parallel execution and are
//! the engine's only synchronization primitive:
//!
//! 1. Reads of sibling configuration/state are snapshots taken at the
//!    start of a phase invocation, never live views.
//! 2. A plugin's writes commit only after its invocation returns
//!    successfully; a failed invocation commits nothing.
//!
//! Persistence is delegated to a [`PersistenceBackend`]; the engine
//! only requires load/save/list of an opaque per-environment document.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::{Arc, RwLock};

use ensemble_plugin_api::{CommonConfig, PluginOutput, Settings};
use ensemble_utils::error::{EnsembleError, SystemError};
use ensemble_utils::types::LifecyclePhase;

/// Everything the store persists for one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvDocument {
    /// Plugin-owned configuration inputs, keyed by plugin name.
    #[serde(default)]
    pub settings: BTreeMap<String, Settings>,
    /// Resource description outputs (endpoints, ids), keyed by plugin.
    #[serde(default)]
    pub resources: BTreeMap<String, Settings>,
    /// Execution state outputs, keyed by plugin.
    #[serde(default)]
    pub state: BTreeMap<String, Settings>,
    /// Phases marked complete for this environment.
    #[serde(default)]
    pub completed_phases: BTreeSet<LifecyclePhase>,
}

/// External persistence contract: opaque per-environment documents with
/// get/set/list semantics. The engine imposes no file format.
pub trait PersistenceBackend: Send + Sync {
    /// Loads the document for `environment`, or `None` if it has never
    /// been saved.
    fn load(&self, environment: &str) -> Result<Option<EnvDocument>, EnsembleError>;
    fn save(&self, environment: &str, doc: &EnvDocument) -> Result<(), EnsembleError>;
    fn list(&self) -> Result<Vec<String>, EnsembleError>;
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBackend {
    docs: RwLock<BTreeMap<String, EnvDocument>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn load(&self, environment: &str) -> Result<Option<EnvDocument>, EnsembleError> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(environment).cloned())
    }

    fn save(&self, environment: &str, doc: &EnvDocument) -> Result<(), EnsembleError> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert(environment.to_string(), doc.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, EnsembleError> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.keys().cloned().collect())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> EnsembleError {
    SystemError::Persistence {
        reason: "store lock poisoned".to_string(),
    }
    .into()
}

/// JSON-file backend: one `<environment>.json` per environment under a
/// root directory, written via a temp file and rename so a crashed save
/// never leaves a torn document.
pub struct JsonFileBackend {
    root: Utf8PathBuf,
}

impl JsonFileBackend {
    /// # Errors
    /// `SystemError::Io` if the root directory cannot be created.
    pub fn new(root: impl AsRef<Utf8Path>) -> Result<Self, EnsembleError> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root).map_err(SystemError::Io)?;
        Ok(Self { root })
    }

    fn path_for(&self, environment: &str) -> Utf8PathBuf {
        self.root.join(format!("{environment}.json"))
    }
}

impl PersistenceBackend for JsonFileBackend {
    fn load(&self, environment: &str) -> Result<Option<EnvDocument>, EnsembleError> {
        let path = self.path_for(environment);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SystemError::Io(e).into()),
        };
        let doc = serde_json::from_str(&raw).map_err(|e| SystemError::Persistence {
            reason: format!("malformed document at {path}: {e}"),
        })?;
        Ok(Some(doc))
    }

    fn save(&self, environment: &str, doc: &EnvDocument) -> Result<(), EnsembleError> {
        let path = self.path_for(environment);
        let tmp = self.root.join(format!(".{environment}.json.tmp"));
        let raw = serde_json::to_string_pretty(doc).map_err(|e| SystemError::Persistence {
            reason: format!("serialize document for '{environment}': {e}"),
        })?;
        fs::write(&tmp, raw).map_err(SystemError::Io)?;
        fs::rename(&tmp, &path).map_err(SystemError::Io)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, EnsembleError> {
        let mut envs = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(SystemError::Io)? {
            let entry = entry.map_err(SystemError::Io)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".json")
                && !stem.starts_with('.')
            {
                envs.push(stem.to_string());
            }
        }
        envs.sort();
        Ok(envs)
    }
}

/// The propagation store the orchestrator reads and writes between
/// plugin invocations.
pub struct StateStore {
    backend: Arc<dyn PersistenceBackend>,
    cache: RwLock<BTreeMap<String, EnvDocument>>,
}

impl StateStore {
    #[must_use]
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Convenience constructor for an ephemeral in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    fn with_doc<T>(
        &self,
        environment: &str,
        f: impl FnOnce(&EnvDocument) -> T,
    ) -> Result<T, EnsembleError> {
        {
            let cache = self.cache.read().map_err(poisoned)?;
            if let Some(doc) = cache.get(environment) {
                return Ok(f(doc));
            }
        }
        let doc = self.backend.load(environment)?.unwrap_or_default();
        let mut cache = self.cache.write().map_err(poisoned)?;
        let doc = cache.entry(environment.to_string()).or_insert(doc);
        Ok(f(doc))
    }

    fn mutate_doc(
        &self,
        environment: &str,
        f: impl FnOnce(&mut EnvDocument),
    ) -> Result<(), EnsembleError> {
        let mut cache = self.cache.write().map_err(poisoned)?;
        if !cache.contains_key(environment) {
            let loaded = self.backend.load(environment)?.unwrap_or_default();
            cache.insert(environment.to_string(), loaded);
        }
        let doc = cache
            .get_mut(environment)
            .ok_or_else(|| SystemError::Persistence {
                reason: format!("environment '{environment}' vanished from cache"),
            })?;
        f(doc);
        self.backend.save(environment, doc)
    }

    /// Writes one setting owned by `plugin`.
    ///
    /// # Errors
    /// Persistence failures only; the single-writer rule is structural
    /// (plugins can only reach their own settings through the context).
    pub fn set_setting(
        &self,
        environment: &str,
        plugin: &str,
        key: &str,
        value: &str,
    ) -> Result<(), EnsembleError> {
        self.mutate_doc(environment, |doc| {
            doc.settings
                .entry(plugin.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        })
    }

    /// The plugin's own settings for this environment.
    pub fn settings_of(&self, environment: &str, plugin: &str) -> Result<Settings, EnsembleError> {
        self.with_doc(environment, |doc| {
            doc.settings.get(plugin).cloned().unwrap_or_default()
        })
    }

    /// Snapshot of every plugin's settings, for the read-only
    /// "configuration of other plugins" projection. Taken once at phase
    /// start; holders never observe later writes.
    pub fn settings_snapshot(&self, environment: &str) -> Result<CommonConfig, EnsembleError> {
        self.with_doc(environment, |doc| doc.settings.clone())
    }

    /// Snapshot of every plugin's committed state.
    pub fn state_snapshot(&self, environment: &str) -> Result<CommonConfig, EnsembleError> {
        self.with_doc(environment, |doc| doc.state.clone())
    }

    /// Commits a successful invocation's output under the plugin's
    /// namespace. Append/overwrite per key.
    ///
    /// The orchestrator calls this only after the invocation returned
    /// success, which is what makes a failed plugin's partial internal
    /// writes invisible to the rest of the engine.
    pub fn commit(
        &self,
        environment: &str,
        plugin: &str,
        output: &PluginOutput,
    ) -> Result<(), EnsembleError> {
        self.mutate_doc(environment, |doc| {
            doc.resources
                .entry(plugin.to_string())
                .or_default()
                .extend(output.resource_values.clone());
            doc.state
                .entry(plugin.to_string())
                .or_default()
                .extend(output.state_values.clone());
        })
    }

    /// Removes all committed state and resource values for `plugin`.
    pub fn reset_state(&self, environment: &str, plugin: &str) -> Result<(), EnsembleError> {
        self.mutate_doc(environment, |doc| {
            doc.state.remove(plugin);
            doc.resources.remove(plugin);
        })
    }

    pub fn mark_phase_complete(
        &self,
        environment: &str,
        phase: LifecyclePhase,
    ) -> Result<(), EnsembleError> {
        self.mutate_doc(environment, |doc| {
            doc.completed_phases.insert(phase);
        })
    }

    pub fn is_phase_complete(
        &self,
        environment: &str,
        phase: LifecyclePhase,
    ) -> Result<bool, EnsembleError> {
        self.with_doc(environment, |doc| doc.completed_phases.contains(&phase))
    }

    /// Clears a completion marker so a caller can explicitly re-run a
    /// phase (re-entry is otherwise rejected).
    pub fn reset_phase(
        &self,
        environment: &str,
        phase: LifecyclePhase,
    ) -> Result<(), EnsembleError> {
        self.mutate_doc(environment, |doc| {
            doc.completed_phases.remove(&phase);
        })
    }
}
