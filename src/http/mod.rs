//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (main listener or an application port)
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID assigned, span opened)
//!     → content pipeline (application, checks, file, cache)
//!     → response.rs (status, encoding, Vary)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
