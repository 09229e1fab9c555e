//! Request interception hooks.

use std::path::PathBuf;

use crate::app::Application;
use crate::content::cache::CacheEntry;
use crate::content::pipeline::IncomingRequest;

/// What a plugin decided about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Serve this file (resolved inside the content root) instead.
    OverrideFile(PathBuf),
    Deny,
}

/// Hooks run in registration order after the security checks. The first
/// plugin that does not return [`Outcome::Continue`] decides.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn on_request(&self, app: &Application, request: &IncomingRequest) -> Outcome;

    /// Called after a freshly generated entry is stored.
    fn on_cache_store(&self, _app: &Application, _entry: &CacheEntry) {}
}
