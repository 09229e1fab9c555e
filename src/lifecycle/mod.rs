//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Registry + discovery → Pipeline → background tasks → listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → listeners drain, helpers stop → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload every application manifest
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then applications, then listeners
//! - One broadcast reaches every long-running task

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
