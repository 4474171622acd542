use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumIter;

/// Phase identifiers for the solution lifecycle.
///
/// `LifecyclePhase` represents the stages a solution moves through from
/// initial scaffolding to publication. Phases have a fixed total order:
///
/// ```text
/// Create → Provision → Configure → Build → Deploy → Publish
/// ```
///
/// A phase may only execute once its predecessor has been marked
/// complete for the same solution and environment. Plugin execution
/// *within* a phase is ordered by the plugin dependency graph, not by
/// this enum.
///
/// # Example
///
/// ```rust
/// use ensemble_utils::types::LifecyclePhase;
///
/// let phase = LifecyclePhase::Provision;
/// assert_eq!(phase.as_str(), "provision");
/// assert_eq!(phase.predecessor(), Some(LifecyclePhase::Create));
/// assert_eq!(LifecyclePhase::Create.predecessor(), None);
/// ```
///
/// # Serialization
///
/// `LifecyclePhase` serializes to its lowercase string form
/// (e.g. `"provision"`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Create phase: scaffolds the solution and its resource units.
    Create,
    /// Provision phase: creates cloud-side resources.
    Provision,
    /// Configure phase: wires provisioned resources together.
    Configure,
    /// Build phase: compiles or packages resource artifacts.
    Build,
    /// Deploy phase: pushes built artifacts to provisioned resources.
    Deploy,
    /// Publish phase: makes the deployed solution publicly available.
    Publish,
}

impl LifecyclePhase {
    /// Returns the canonical lowercase name of the phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Provision => "provision",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Publish => "publish",
        }
    }

    /// Returns the phase that must complete before this one may run.
    ///
    /// `Create` is the entry phase and has no precondition.
    #[must_use]
    pub const fn predecessor(&self) -> Option<Self> {
        match self {
            Self::Create => None,
            Self::Provision => Some(Self::Create),
            Self::Configure => Some(Self::Provision),
            Self::Build => Some(Self::Configure),
            Self::Deploy => Some(Self::Build),
            Self::Publish => Some(Self::Deploy),
        }
    }

    /// Returns the capability a plugin must declare to participate in
    /// this phase.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Create => Capability::Scaffold,
            Self::Provision => Capability::Provision,
            Self::Configure => Capability::Configure,
            Self::Build => Capability::Build,
            Self::Deploy => Capability::Deploy,
            Self::Publish => Capability::Publish,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle capability a plugin may implement.
///
/// Plugins are polymorphic over this set: a plugin implements only the
/// capabilities relevant to it, and absence of a capability simply
/// excludes the plugin from phases requiring it. Presence is checked
/// via [`CapabilitySet`] before scheduling, never by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Scaffold,
    Provision,
    Configure,
    Build,
    Deploy,
    Publish,
    /// The plugin contributes a question subtree for interactive phases.
    Questions,
    /// The plugin exposes a user-invocable custom task.
    CustomTask,
}

impl Capability {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scaffold => "scaffold",
            Self::Provision => "provision",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Publish => "publish",
            Self::Questions => "questions",
            Self::CustomTask => "custom-task",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Scaffold => 1 << 0,
            Self::Provision => 1 << 1,
            Self::Configure => 1 << 2,
            Self::Build => 1 << 3,
            Self::Deploy => 1 << 4,
            Self::Publish => 1 << 5,
            Self::Questions => 1 << 6,
            Self::CustomTask => 1 << 7,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicit capability bitset.
///
/// The orchestrator consults this before scheduling; a plugin is never
/// asked to perform a phase whose capability it does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a set from a slice of capabilities.
    #[must_use]
    pub fn from_slice(caps: &[Capability]) -> Self {
        let mut set = Self::empty();
        for cap in caps {
            set = set.with(*cap);
        }
        set
    }

    /// Returns a copy of the set with `cap` added.
    #[must_use]
    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    /// Returns true if the set contains `cap`.
    #[must_use]
    pub const fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Returns true if no capability is declared.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// Local toolchain prerequisites a solution or plugin may declare.
///
/// Shared here so both the dependency sequencer (ensemble-doctor) and
/// the plugin contract can name tools without depending on each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    NodeRuntime,
    DotnetSdk,
    FuncCoreTools,
    BicepCli,
}

impl ToolKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeRuntime => "node",
            Self::DotnetSdk => "dotnet",
            Self::FuncCoreTools => "func",
            Self::BicepCli => "bicep",
        }
    }

    /// Human-readable tool name for reports.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::NodeRuntime => "Node.js runtime",
            Self::DotnetSdk => ".NET SDK",
            Self::FuncCoreTools => "Azure Functions Core Tools",
            Self::BicepCli => "Bicep CLI",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install/probe status for one local tool, as reported by the
/// dependency sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Human-readable tool name.
    pub name: String,
    /// Which tool this entry describes.
    pub kind: ToolKind,
    /// Whether the tool is installed and usable.
    pub is_installed: bool,
    /// The command probed for on PATH.
    pub command: String,
    /// Probe details (resolved path, skip reason, ...).
    pub details: String,
    /// Probe or install error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn phase_order_is_total() {
        let order: Vec<LifecyclePhase> = LifecyclePhase::iter().collect();
        assert_eq!(order[0], LifecyclePhase::Create);
        assert_eq!(order[5], LifecyclePhase::Publish);
        // Every phase except Create names its left neighbour as predecessor.
        for pair in order.windows(2) {
            assert_eq!(pair[1].predecessor(), Some(pair[0]));
        }
        assert_eq!(LifecyclePhase::Create.predecessor(), None);
    }

    #[test]
    fn phase_capability_mapping() {
        assert_eq!(
            LifecyclePhase::Provision.capability(),
            Capability::Provision
        );
        assert_eq!(LifecyclePhase::Create.capability(), Capability::Scaffold);
    }

    #[test]
    fn capability_set_membership() {
        let set = CapabilitySet::from_slice(&[Capability::Provision, Capability::Questions]);
        assert!(set.contains(Capability::Provision));
        assert!(set.contains(Capability::Questions));
        assert!(!set.contains(Capability::Deploy));
        assert!(CapabilitySet::empty().is_empty());
    }

    #[test]
    fn capability_bits_are_distinct() {
        let all: CapabilitySet = Capability::iter().collect();
        for cap in Capability::iter() {
            assert!(all.contains(cap));
        }
    }
}
