//! Build output storage.
//!
//! # Data Flow
//! ```text
//! Build dispatcher
//!     → publish outputs (path → BuildArtifact) tagged with their origin
//!     → store.rs (concurrent map, index fallback)
//!     ← request server looks up the routed destination
//! ```
//!
//! # Design Decisions
//! - Artifacts are a closed set: static file, in-memory blob, function
//! - Functions are torn down whenever they leave the store

pub mod artifact;
pub mod function;
pub mod store;

pub use artifact::{Blob, BuildArtifact, FunctionAsset, StaticFileRef};
pub use function::{FunctionHandle, InvocationPayload, InvocationResult, InvokeError};
pub use store::{AssetEntry, AssetOrigin, AssetStore, ResolvedAsset};
