//! # cpat-id
//!
//! Resource references and agent identities used by the cpat harness.
//!
//! ## Design Principles
//!
//! - References are minted by the service under test; the harness never
//!   invents their format and treats them as opaque strings
//! - References are typed so an instance ID cannot be passed where a tenant
//!   ID is expected
//! - Every reference is safe to splice into a URL path segment
//! - Agent identities are UUIDs owned by the harness
//!
//! ## Reference Format
//!
//! Any non-empty string without `/`, `?`, `#` or whitespace. Examples:
//! - `8d3c1a5e-2f4b-4c3e-9a41-0d8b6f1c2e77`
//! - `batch-7`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
