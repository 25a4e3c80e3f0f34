//! Generic data-plane client
//!
//! Performs create-or-update, read, delete and custom action calls against any
//! cloud resource addressed by a URL path and an API version, driving
//! long-running operations to completion and optionally retrying transient
//! failures.

pub mod cloud;
pub mod config;
pub mod error;
pub mod resource;

/// Version injected at compile time via DATAPLANE_CLIENT_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("DATAPLANE_CLIENT_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

pub use cloud::{
    ClientOptions, CloudConfiguration, DataPlaneClient, DataPlaneRequester, RetryPolicy,
    RetryableClient, StaticTokenCredential, TokenCredential,
};
pub use error::{Error, PollError, ResponseError, Result};
pub use resource::ResourceId;
