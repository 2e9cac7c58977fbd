//! # Payload Staging and Bucket Transfer
//!
//! Large payloads can travel to the API through a cloud bucket instead of the
//! request body:
//!
//! - [`bucket`]: permission probe and upload against the fixed bucket
//! - [`staging`]: turns caller payloads (paths or raw bytes) into files on
//!   disk, with scoped cleanup of anything created along the way

pub mod bucket;
pub mod staging;

pub use bucket::{Bucket, BucketUri};
pub use staging::{PackingSource, StagedFile};
