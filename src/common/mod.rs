//! # Common Components
//!
//! Shared definitions used by the client, the transport and the binary.
//!
//! ## Modules
//!
//! - [`config`]: Client configuration and TOML loading
//! - [`messages`]: Request descriptors, response envelope and typed results
//! - [`routes`]: Operation to backend mapping

pub mod config;
pub mod messages;
pub mod routes;
