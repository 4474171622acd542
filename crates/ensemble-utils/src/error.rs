use std::io;
use thiserror::Error;

/// Library-level error type for the ensemble engine.
///
/// `EnsembleError` is the only error type callers observe. Every
/// failure crossing the engine boundary is one of these variants;
/// anything a plugin throws that is not already classified is coerced
/// into [`SystemError::Uncaught`] by the invocation boundary guard, so
/// callers never see a raw unclassified failure.
///
/// # Error kinds
///
/// Every variant classifies as either [`ErrorKind::User`]
/// (caller-actionable: bad input, missing permission, misconfigured
/// registration) or [`ErrorKind::System`] (unexpected internal
/// failure). Use [`kind()`](Self::kind) for the classification and
/// [`display_for_user()`](Self::display_for_user) for a message with
/// suggestions suitable for end users.
///
/// # Fatal vs partial
///
/// `PhaseOrder`, `CyclicDependency`, and `DuplicateQuestionId` abort a
/// phase before any plugin runs and therefore carry no partial result.
/// Plugin-level `User`/`System` errors and `Cancelled` are surfaced by
/// the orchestrator together with the partial result accumulated
/// before the failure.
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("user error: {0}")]
    User(#[from] UserError),

    #[error("system error: {0}")]
    System(#[from] SystemError),

    #[error("phase ordering violation for '{phase}' in environment '{environment}': {reason}")]
    PhaseOrder {
        phase: String,
        environment: String,
        reason: String,
    },

    #[error("cyclic plugin dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("duplicate question path '{path}' contributed by plugins '{first}' and '{second}'")]
    DuplicateQuestionId {
        path: String,
        first: String,
        second: String,
    },

    #[error("phase cancelled; {committed} plugin(s) had already committed")]
    Cancelled { committed: usize },
}

/// Caller-actionable failures: missing input, invalid selection,
/// missing permission, uninstalled local toolchain.
#[derive(Error, Debug)]
pub enum UserError {
    #[error("missing required input '{key}'")]
    MissingInput { key: String },

    #[error("invalid value '{value}' for '{path}': {reason}")]
    InvalidSelection {
        path: String,
        value: String,
        reason: String,
    },

    #[error("permission denied: {action}")]
    PermissionDenied { action: String },

    #[error("required tool '{tool}' is not installed (needed by plugin '{plugin}')")]
    ToolNotInstalled { tool: String, plugin: String },

    #[error("a plugin named '{name}' is already registered")]
    DuplicatePlugin { name: String },

    #[error("no plugin named '{name}' is registered")]
    UnknownPlugin { name: String },

    #[error("{message}")]
    Other { message: String },
}

/// Unexpected internal failures, including anything the boundary guard
/// had to coerce.
#[derive(Error, Debug)]
pub enum SystemError {
    /// An unclassified failure coerced at the invocation boundary.
    #[error("uncaught error in '{source_name}': {detail}")]
    Uncaught { source_name: String, detail: String },

    /// A plugin invocation panicked; the panic was contained by the
    /// boundary guard.
    #[error("plugin '{plugin}' panicked during '{phase}'")]
    InvocationPanicked { plugin: String, phase: String },

    #[error("persistence failure: {reason}")]
    Persistence { reason: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Two-way classification of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-actionable: fix input, configuration, or permissions.
    User,
    /// Internal or unexpected; not resolvable by changing caller input.
    System,
}

impl EnsembleError {
    /// Classifies the error as user- or system-kind.
    ///
    /// Ordering violations, dependency cycles, and duplicate question
    /// registrations are configuration mistakes and classify as
    /// `User`; cancellation is caller-initiated and classifies the
    /// same way.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::User(_)
            | Self::PhaseOrder { .. }
            | Self::CyclicDependency { .. }
            | Self::DuplicateQuestionId { .. }
            | Self::Cancelled { .. } => ErrorKind::User,
            Self::System(_) => ErrorKind::System,
        }
    }

    /// True for errors that abort a phase before any plugin runs.
    #[must_use]
    pub const fn is_fatal_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::PhaseOrder { .. } | Self::CyclicDependency { .. } | Self::DuplicateQuestionId { .. }
        )
    }

    /// Normalizes an arbitrary failure into a classified engine error.
    ///
    /// This is the boundary-guard coercion: if `err` already is an
    /// `EnsembleError` it passes through unchanged, otherwise it is
    /// wrapped as [`SystemError::Uncaught`] attributed to
    /// `source_name`.
    #[must_use]
    pub fn normalize(err: anyhow::Error, source_name: &str) -> Self {
        match err.downcast::<Self>() {
            Ok(classified) => classified,
            Err(other) => Self::System(SystemError::Uncaught {
                source_name: source_name.to_string(),
                detail: format!("{other:#}"),
            }),
        }
    }

    /// A user-facing message with context and suggestions.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut out = self.to_string();
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n\nSuggestions:");
            for s in suggestions {
                out.push_str("\n  - ");
                out.push_str(&s);
            }
        }
        out
    }

    /// Suggested actions to resolve the error.
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::PhaseOrder { reason, .. } => {
                vec![format!("resolve the ordering problem: {reason}")]
            }
            Self::CyclicDependency { cycle } => vec![format!(
                "break the dependency cycle by removing one of the declared edges along: {}",
                cycle.join(" -> ")
            )],
            Self::DuplicateQuestionId { first, second, .. } => vec![format!(
                "rename the question in plugin '{first}' or '{second}' so answer paths are unique"
            )],
            Self::User(UserError::ToolNotInstalled { tool, .. }) => {
                vec![format!("install '{tool}' and re-run the phase")]
            }
            Self::User(UserError::MissingInput { key }) => {
                vec![format!("supply a value for '{key}'")]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn normalize_passes_classified_errors_through() {
        let original = EnsembleError::User(UserError::MissingInput {
            key: "tenant-id".into(),
        });
        let normalized = EnsembleError::normalize(anyhow::Error::new(original), "frontend");
        assert!(matches!(
            normalized,
            EnsembleError::User(UserError::MissingInput { .. })
        ));
    }

    #[test]
    fn normalize_coerces_unclassified_to_uncaught() {
        let normalized = EnsembleError::normalize(anyhow!("socket hangup"), "bot");
        match normalized {
            EnsembleError::System(SystemError::Uncaught {
                source_name,
                detail,
            }) => {
                assert_eq!(source_name, "bot");
                assert!(detail.contains("socket hangup"));
            }
            other => panic!("expected Uncaught, got {other:?}"),
        }
        assert_eq!(
            EnsembleError::normalize(anyhow!("x"), "bot").kind(),
            ErrorKind::System
        );
    }

    #[test]
    fn pre_execution_errors_are_fatal() {
        let cycle = EnsembleError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(cycle.is_fatal_pre_execution());
        assert_eq!(cycle.kind(), ErrorKind::User);

        let cancelled = EnsembleError::Cancelled { committed: 1 };
        assert!(!cancelled.is_fatal_pre_execution());
    }

    #[test]
    fn display_for_user_includes_suggestions() {
        let err = EnsembleError::PhaseOrder {
            phase: "deploy".into(),
            environment: "dev".into(),
            reason: "phase 'build' has not completed".into(),
        };
        let text = err.display_for_user();
        assert!(text.contains("Suggestions:"));
        assert!(text.contains("build"));
    }
}
