//! Plugin registry, capability queries, and dependency ordering.
//!
//! The registry holds the set of registered plugins for the lifetime of
//! the process and answers two questions: which plugins declare a given
//! capability, and what is the dependency-ordered subsequence of a
//! given plugin subset. Registration order is preserved and used as the
//! deterministic tie-break wherever no dependency edge dictates order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ensemble_plugin_api::ResourcePlugin;
use ensemble_utils::error::{EnsembleError, UserError};
use ensemble_utils::types::{Capability, CapabilitySet};

/// Immutable summary of a registered plugin.
///
/// Derived from the plugin trait object at registration time and never
/// updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub display_name: String,
    pub capabilities: CapabilitySet,
    /// Declared ordering dependencies, by plugin name.
    pub dependencies: Vec<String>,
}

/// Registration-order-preserving set of plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn ResourcePlugin>>,
    by_name: BTreeMap<String, usize>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin. Names must be unique.
    ///
    /// # Errors
    /// `UserError::DuplicatePlugin` if the name is taken.
    pub fn register(&mut self, plugin: Arc<dyn ResourcePlugin>) -> Result<(), EnsembleError> {
        let name = plugin.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(UserError::DuplicatePlugin { name }.into());
        }
        self.by_name.insert(name, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    /// All plugins in registration order.
    #[must_use]
    pub fn plugins(&self) -> &[Arc<dyn ResourcePlugin>] {
        &self.plugins
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ResourcePlugin>> {
        self.by_name.get(name).map(|&i| &self.plugins[i])
    }

    /// Descriptors for every registered plugin, registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .map(|p| PluginDescriptor {
                name: p.name().to_string(),
                display_name: p.display_name().to_string(),
                capabilities: p.capabilities(),
                dependencies: p.dependencies(),
            })
            .collect()
    }

    /// Plugins declaring `capability`, registration order.
    #[must_use]
    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<dyn ResourcePlugin>> {
        self.plugins
            .iter()
            .filter(|p| p.capabilities().contains(capability))
            .cloned()
            .collect()
    }

    /// Resolves a list of names to plugins, registration order.
    ///
    /// # Errors
    /// `UserError::UnknownPlugin` for any unregistered name.
    pub fn subset(&self, names: &[String]) -> Result<Vec<Arc<dyn ResourcePlugin>>, EnsembleError> {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let Some(&i) = self.by_name.get(name) else {
                return Err(UserError::UnknownPlugin { name: name.clone() }.into());
            };
            indices.push(i);
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(indices.into_iter().map(|i| self.plugins[i].clone()).collect())
    }
}

/// Topologically sorts `subset` by declared dependencies.
///
/// Edges are declared dependencies restricted to the subset;
/// dependencies on plugins outside the subset are ignored. Ties (no
/// dependency relation) break by position in `subset`, which the
/// registry keeps equal to registration order, so output is
/// deterministic across runs with identical registration order.
///
/// # Errors
/// `EnsembleError::CyclicDependency` naming one cycle in the restricted
/// graph. Fatal for the invoked phase; nothing is executed.
pub fn topo_sort(
    subset: &[Arc<dyn ResourcePlugin>],
) -> Result<Vec<Arc<dyn ResourcePlugin>>, EnsembleError> {
    let names: Vec<String> = subset.iter().map(|p| p.name().to_string()).collect();
    let in_subset: BTreeMap<&str, usize> =
        names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();

    // deps[i] = indices of in-subset plugins that i depends on.
    let deps: Vec<Vec<usize>> = subset
        .iter()
        .map(|p| {
            p.dependencies()
                .iter()
                .filter_map(|d| in_subset.get(d.as_str()).copied())
                .collect()
        })
        .collect();

    let mut indegree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); subset.len()];
    for (i, ds) in deps.iter().enumerate() {
        for &d in ds {
            dependents[d].push(i);
        }
    }

    // Kahn's algorithm with an ordered ready set: always admit the
    // lowest subset index first, which is the declaration-order
    // tie-break.
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(subset.len());

    while let Some(&i) = ready.iter().next() {
        ready.remove(&i);
        order.push(i);
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < subset.len() {
        let remaining: BTreeSet<usize> = (0..subset.len())
            .filter(|i| !order.contains(i))
            .collect();
        return Err(EnsembleError::CyclicDependency {
            cycle: name_cycle(&names, &deps, &remaining),
        });
    }

    Ok(order.into_iter().map(|i| subset[i].clone()).collect())
}

/// Walks the leftover graph after Kahn's algorithm to name one cycle.
fn name_cycle(names: &[String], deps: &[Vec<usize>], remaining: &BTreeSet<usize>) -> Vec<String> {
    let mut trail: Vec<usize> = Vec::new();
    let mut current = match remaining.iter().next() {
        Some(&i) => i,
        None => return Vec::new(),
    };
    loop {
        trail.push(current);
        // Every node Kahn left behind has at least one in-remaining
        // dependency; if that invariant somehow breaks, report the
        // whole remaining set rather than panic.
        let Some(next) = deps[current].iter().copied().find(|d| remaining.contains(d)) else {
            return remaining.iter().map(|&n| names[n].clone()).collect();
        };
        if let Some(pos) = trail.iter().position(|&n| n == next) {
            let mut cycle: Vec<String> = trail[pos..].iter().map(|&n| names[n].clone()).collect();
            cycle.push(names[next].clone());
            return cycle;
        }
        current = next;
    }
}

/// Partitions a dependency-ordered plugin list into concurrency tiers.
///
/// Members of one tier have no dependency relation among themselves and
/// may run in parallel; a plugin lands in the tier after the deepest of
/// its in-subset dependencies. Order within a tier follows the input
/// order (i.e. registration order).
#[must_use]
pub fn tiers(ordered: &[Arc<dyn ResourcePlugin>]) -> Vec<Vec<Arc<dyn ResourcePlugin>>> {
    let position: BTreeMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name(), i))
        .collect();

    let mut depth = vec![0usize; ordered.len()];
    let mut result: Vec<Vec<Arc<dyn ResourcePlugin>>> = Vec::new();

    for (i, plugin) in ordered.iter().enumerate() {
        let d = plugin
            .dependencies()
            .iter()
            .filter_map(|dep| position.get(dep.as_str()).copied())
            .map(|j| depth[j] + 1)
            .max()
            .unwrap_or(0);
        depth[i] = d;
        if result.len() <= d {
            result.resize_with(d + 1, Vec::new);
        }
        result[d].push(plugin.clone());
    }

    result
}
