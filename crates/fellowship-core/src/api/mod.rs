//! Remote backend module.
//!
//! This module defines the `RemoteBackend` contract the sync engine consumes,
//! the classified `ApiError` taxonomy, and `HttpBackend`, a REST client for
//! the portal backend.
//!
//! Requests carry a bearer token; rate-limited requests are retried with
//! exponential backoff before the failure is reported as transient.

pub mod backend;
pub mod client;
pub mod error;

#[cfg(test)]
pub mod mock;

pub use backend::RemoteBackend;
pub use client::HttpBackend;
pub use error::{ApiError, ErrorClass};
