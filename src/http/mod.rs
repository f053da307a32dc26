//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, graceful shutdown)
//!     → request.rs (trace id, span, response stamping)
//!     → state.rs (current project snapshot)
//!     → routing (RouteDecision)
//!     → Redirect: response.rs
//!     → Proxy: proxy.rs (reqwest, streamed response)
//!     → Local: state.rs (asset lookup, build on demand)
//!         → serve.rs (static file / blob)
//!         → invoke.rs (function payload / result)
//!     → Send to client
//! ```

pub mod invoke;
pub mod proxy;
pub mod request;
pub mod response;
pub mod serve;
pub mod server;
pub mod state;

pub use request::RequestTrace;
pub use server::{router, DevServer};
pub use state::DevState;
