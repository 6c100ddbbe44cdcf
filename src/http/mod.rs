//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, TraceLayer, Audit-ID generation)
//!     → request.rs (authenticate, attach RequestContext)
//!     → routing registry (group/version → ProxyHandler)
//!     → proxied response, or the local delegate
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::MakeAuditId;
pub use server::{local_delegate, AppState, HttpServer};
