//! Shared foundation for the ensemble lifecycle engine.
//!
//! This crate carries the types every other ensemble crate agrees on
//! (lifecycle phases, capabilities), the error taxonomy, and the
//! tracing/telemetry setup. It has no knowledge of plugins or
//! scheduling; those live in the crates that depend on it.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{EnsembleError, ErrorKind, SystemError, UserError};
pub use types::{Capability, CapabilitySet, DependencyStatus, LifecyclePhase, ToolKind};
