//! sitehost: multi-tenant web application hosting.
//!
//! Applications are directories with a manifest (`app.conf`). Requests are
//! routed by host (or by an application's own port) to an application, then
//! through the content pipeline: path rules, file lookup, template
//! compilation, cache and compression.

// Language
pub mod parser;

// Core subsystems
pub mod app;
pub mod content;
pub mod routing;

// Transport and management
pub mod config;
pub mod control;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use app::{Application, Registry};
pub use config::ServerConfig;
pub use content::{IncomingRequest, Pipeline};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
