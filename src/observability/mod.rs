//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (tracing subscriber: pretty or JSON lines)
//!     → metrics.rs (requests, builds, dedup joins, asset count)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Every request runs inside a span carrying its trace id
//! - `RUST_LOG` overrides the configured level
//! - Recording metrics without an installed exporter is a no-op

pub mod logging;
pub mod metrics;
