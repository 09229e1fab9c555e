//! Control channel subsystem.
//!
//! # Data Flow
//! ```text
//! sitehost-cli (or a process manager)
//!     → unix socket line "<id> <command> [args...]"
//!     → server.rs (one task per connection)
//!     → command.rs (parse → execute against the Registry)
//!     → JSON line {"id", "error", "data"}
//! ```
//!
//! # Design Decisions
//! - Local socket only, no network exposure
//! - A failed command is a reply with `error` set, never a dropped connection

pub mod command;
pub mod server;

pub use command::{handle_line, Command, ControlError, Reply};
pub use server::ControlServer;
