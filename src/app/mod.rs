//! Application subsystem.
//!
//! # Data Flow
//! ```text
//! Discovery (startup, watcher event, control `reload`):
//!     application directory
//!     → manifest.rs (find app.conf / legacy names, parse to ConfigView)
//!     → case_override applied for the run mode
//!     → features.rs (typed feature blocks + compiled PathMatcher)
//!     → application.rs (snapshot swapped in, cache cleared)
//!     → registry.rs (diff domains/ports, update router + port table)
//!
//! Request:
//!     host or bound port → registry.rs → Arc<Application>
//!     request path → paths.rs (clamped to the content root)
//! ```
//!
//! # Design Decisions
//! - One explicit Registry per server, no process globals
//! - A broken manifest keeps the previous snapshot serving
//! - Paths are normalized lexically and clamped, never rejected

pub mod application;
pub mod features;
pub mod manifest;
pub mod paths;
pub mod registry;

pub use application::{AppSnapshot, Application};
pub use features::{BrowserSupport, Features, LibraryPin, ModuleSpec};
pub use manifest::{ConfigView, ManifestError};
pub use paths::{resolve_path, AppResolver};
pub use registry::{AppInfo, PortEvent, Registry, RegistryError, RegistrySettings};
