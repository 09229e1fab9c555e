//! Content subsystem.
//!
//! # Data Flow
//! ```text
//! IncomingRequest (host, path, headers, peer)
//!     → pipeline.rs
//!         → application (bound port, else host router)
//!         → disabled 503 / HTTPS 302 / rate limit 429 / browser 422
//!         → plugin.rs hooks (continue, override file, deny)
//!         → path action (deny 403, redirect 302, handle, alias)
//!         → file: exact, .html, dir/index.html (bare directory 403)
//!         → cache.rs (fresh? else single-flight regenerate)
//!             → .html: parser + compile.rs with the request context
//!             → .js/.css: minify.rs contract
//!             → compress.rs (gzip + brotli variants)
//!     → negotiate Accept-Encoding → Response (Vary: Accept-Encoding)
//! ```
//!
//! # Design Decisions
//! - Cache entries are validated against source and import mtimes
//! - One regeneration per path at a time, waiters reuse the result
//! - Request errors are logged with the application id and become a 500

pub mod cache;
pub mod compile;
pub mod compress;
pub mod minify;
pub mod pipeline;
pub mod plugin;

pub use cache::{CacheEntry, ContentCache};
pub use compile::{compile, DirectiveKind, RenderContext};
pub use compress::Encoding;
pub use minify::{Minifier, MinifyError, Passthrough};
pub use pipeline::{IncomingRequest, Pipeline, PipelineError, PipelineSettings};
pub use plugin::{Outcome, Plugin};
