//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (application resolved):
//!     → rate_limit.rs (per-application token bucket keyed by client IP)
//!     → 429 when empty, otherwise continue to path checks
//! ```
//!
//! # Design Decisions
//! - Each application owns its limiter; one tenant's traffic never drains
//!   another tenant's buckets
//! - Fail closed: reject when the bucket is empty
//! - No trust in client input (client key is the peer address, not a header)

pub mod rate_limit;

pub use rate_limit::{RateLimitPolicy, RateLimiter};
