//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! dev.toml (optional) + CLI flags
//!     → loader.rs (parse & deserialize)
//!     → DevConfig (immutable for the life of the server)
//!
//! now.json (re-read before each routed request)
//!     → loader.rs (parse)
//!     → validation.rs (semantic checks, all errors at once)
//!     → env.rs (resolve env + secrets against dotenv files)
//!     → ProjectSnapshot (validated, routes compiled)
//!     → atomic swap of Arc<ProjectSnapshot> when content changed
//!
//! Source file changes:
//!     watcher.rs detects change
//!     → changed paths forwarded to the dev server
//!     → cached builds for that entrypoint invalidated
//! ```
//!
//! # Design Decisions
//! - A snapshot is only replaced by a fully valid one; a broken edit at
//!   runtime keeps serving the previous snapshot
//! - Invalid config at startup is fatal
//! - All fields of DevConfig have defaults to allow minimal configs

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use env::ProjectEnv;
pub use loader::{ConfigError, ProjectSnapshot};
pub use schema::{BuildConfig, DevConfig, ProjectConfig, RouteRule};
