//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path (+ query)
//!     → router.rs (walk rules in declaration order)
//!     → matcher.rs (anchored regex, $n / $name substitution)
//!     → RouteDecision { Local | Proxy | Redirect, destination, headers, args }
//!
//! Route Compilation (per project snapshot):
//!     RouteRule[]
//!     → Compile patterns once
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled when the project config changes, immutable afterwards
//! - Deterministic: same (path, table) always yields the same decision
//! - No I/O: the request server acts on the decision

pub mod matcher;
pub mod router;

pub use router::{resolve_route, RouteAction, RouteDecision, RouteTable};
