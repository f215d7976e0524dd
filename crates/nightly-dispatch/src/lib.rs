//! Nightly Builder dispatch engine.
//!
//! Triggers builds on a remote CI service on behalf of a caller: fetches
//! the repository's build manifest, filters its job matrix against
//! caller-supplied overrides, submits a build request to the CI API, and
//! polls until the request resolves into concrete builds or a bounded
//! time elapses.

pub mod config;
pub mod manifest;
pub mod matrix;
pub mod runner;

pub use config::DispatchConfig;
pub use manifest::ManifestClient;
pub use runner::Runner;
