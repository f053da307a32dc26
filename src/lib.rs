//! Local development server for serverless projects.
//!
//! Routes requests through the project's declarative route table, builds
//! sources on demand through pluggable builders, and serves the resulting
//! static files, blobs and functions.

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;

// Builds and their outputs
pub mod assets;
pub mod builds;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use builds::BuilderCatalog;
pub use config::DevConfig;
pub use error::DevError;
pub use http::DevServer;
pub use lifecycle::Shutdown;
