//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → registry / pipeline / listener settings
//!
//! Application manifests (not this file) change at runtime:
//!     watcher.rs detects manifest / directory changes
//!     → application root sent over a channel
//!     → registry refreshes that application only
//! ```
//!
//! # Design Decisions
//! - Server config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::ServerConfig;
pub use validation::ValidationError;
pub use watcher::AppWatcher;
