//! Nightly Builder Core
//!
//! Shared domain types and error handling for the build dispatch engine.
//! This crate has minimal dependencies and defines the vocabulary used
//! by the dispatch crate: requests, results, and build-matrix job entries.

pub mod error;
pub mod job;
pub mod request;

pub use error::{Error, Result};
pub use job::JobEntry;
pub use request::{Build, DispatchRequest, DispatchResult, RequestStatus, SubmittedRequest};
