#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! One version-control interface over Git and Jujutsu, plus the agent
//! bookmark lifecycle built on top of it.
//!
//! A [`Factory`] detects the repository around a path and hands out a
//! [`Vcs`] handle for the right backend. Backends shell out to the tool's
//! CLI and translate its failures into [`VcsError`] kinds. [`AgentManager`]
//! spawns, hands off, completes, archives and recovers agent references using
//! only the [`Vcs`] contract. The CLI binary in `crates/agentvcs` builds on
//! this library.

/// Agent reference lifecycle.
pub mod agent;
/// Environment configuration.
pub mod config;
/// Repository and binary detection.
pub mod detect;
/// Error taxonomy.
pub mod error;
/// Subprocess execution with deadlines and cancellation.
pub mod exec;
/// Handle creation and caching.
pub mod factory;
/// Git backend.
pub mod git;
/// Jujutsu backend.
pub mod jj;
/// Backend constructor registry.
pub mod registry;
/// The backend contract and its value types.
pub mod vcs;

pub use agent::{AgentManager, normalize_agent_id};
pub use config::Config;
pub use detect::{Availability, DetectionResult, detect, detect_with_availability};
pub use error::{ErrorKind, Result, VcsError};
pub use exec::{CancelToken, ExecContext};
pub use factory::Factory;
pub use registry::{Registry, register_builtin_backends};
pub use vcs::{BackendTag, Vcs, Workspace};
