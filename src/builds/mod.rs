//! Build subsystem.
//!
//! # Data Flow
//! ```text
//! Project config `builds` list
//!     → registry.rs (reconcile: add / replace / remove build matches)
//!
//! Request for a missing or stale asset
//!     → registry.rs (source glob lookup, entrypoint resolution)
//!     → dispatcher.rs (dedup in-flight builds, rebuild window)
//!     → builder.rs (Builder trait, resolved by identifier)
//!     → assets::AssetStore (publish outputs)
//! ```
//!
//! # Design Decisions
//! - At most one in-flight build per (entrypoint, builder)
//! - Environment is passed to builders explicitly, never through the
//!   process environment
//! - A build that never completes blocks every request awaiting it; there
//!   is no build timeout

pub mod builder;
pub mod builtin;
pub mod dispatcher;
pub mod registry;

pub use builder::{BuildContext, BuildOutput, Builder, BuilderCatalog, BuilderVersion};
pub use dispatcher::{BuildDispatcher, BuildError, BuildKey, CompletedBuild};
pub use registry::{BuildMatch, BuildMatchRegistry, ReconcileOutcome};
