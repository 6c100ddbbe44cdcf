//! API aggregation reverse proxy.
//!
//! Serves `/apis/<group>/<version>` either locally or by proxying to the
//! backing service registered for that group/version, presenting the
//! caller's identity through auth-proxy headers.

pub mod apiservice;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod routing;
pub mod security;
pub mod service;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ProxyHandler, ProxyOptions};
pub use routing::ApiServiceRegistry;
