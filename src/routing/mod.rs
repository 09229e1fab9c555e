//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (host → application id)
//!     → matcher.rs (path → merged attribute bag → PathAction)
//!     → Return: application + action, or NoMatch
//!
//! Route Compilation (on load / reload):
//!     manifest blocks (server.domains, route, redirect, handle, location)
//!     → expand brace groups, split wildcards
//!     → build new tables
//!     → swap in atomically (in-flight requests keep the old snapshot)
//! ```
//!
//! # Design Decisions
//! - Tables are rebuilt off to the side and swapped, never mutated in place
//! - No regex in hot path (literal segment scanning only)
//! - Deterministic: same input always matches same route
//! - First claimant of a domain keeps it

pub mod matcher;
pub mod router;

pub use matcher::{expand_alias, PathAction, PathAttributes, PathMatcher};
pub use router::{expand_pattern, normalize_host, DomainRouter};
