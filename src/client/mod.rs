//! # Client Components
//!
//! The client is split into two main components:
//!
//! ## Core Client ([`client`])
//! One method per API operation: input validation, request descriptors and
//! typed decoding of results.
//!
//! ## Client Middleware ([`middleware`])
//! Everything shared between operations:
//! - Endpoint routing and backend URL resolution
//! - Default authentication headers
//! - Bucket-versus-inline transport decision
//! - Status classification and response decoding
//! - Debug echo of requests and failures

pub mod client;
pub mod middleware;

// Re-export for convenience
pub use client::{mesh_center, VixivClient};
pub use middleware::{FileRole, Transport};
