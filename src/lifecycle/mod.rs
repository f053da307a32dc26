//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (http::DevServer::start):
//!     Load project → Reconcile builds → Eager v1 builds → Bind → Serve
//!
//! Shutdown (shutdown.rs):
//!     stop() → stopping flag → Destroy functions → Close listener → Return
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop()
//! ```
//!
//! # Design Decisions
//! - Shutdown is idempotent: only the first trigger does anything
//! - New requests fail fast as soon as shutdown begins

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
