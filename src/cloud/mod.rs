//! Cloud data-plane interaction module
//!
//! This module provides the request/poll/retry engine for talking to any cloud
//! resource endpoint addressed by URL path and API version.
//!
//! # Module Structure
//!
//! - [`auth`] - Token credential abstraction and bearer-token caching
//! - [`environment`] - Cloud service endpoint/audience tables
//! - [`pipeline`] - Per-service authenticated transport pipelines and their cache
//! - [`http`] - Request preparation, status validation and payload decoding
//! - [`poller`] - Long-running operation polling
//! - [`client`] - Main client for CRUD and action calls
//! - [`retry`] - Pattern-based retry decorator with exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use dataplane_client::cloud::{ClientOptions, DataPlaneClient, DataPlaneRequester};
//! use dataplane_client::resource::ResourceId;
//!
//! async fn example(credential: Arc<dyn TokenCredential>) -> dataplane_client::Result<()> {
//!     let client = DataPlaneClient::new(ClientOptions::new(credential))?;
//!     let id = ResourceId::new("myvault.vault.azure.net/secrets/db", "7.4")?;
//!     let secret = client.get(&id, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod environment;
pub mod http;
pub mod pipeline;
pub mod poller;
pub mod retry;

pub use auth::{AccessToken, BearerTokenPolicy, StaticTokenCredential, TokenCredential};
pub use client::{ClientOptions, DataPlaneClient, DataPlaneRequester};
pub use environment::{CloudConfiguration, ServiceConfiguration, RESOURCE_MANAGER};
pub use http::decode_payload;
pub use pipeline::{Pipeline, PipelineCache, PipelineOptions, TransportOptions};
pub use poller::DEFAULT_POLL_FREQUENCY;
pub use retry::{ExponentialBackoff, ExponentialBackoffConfig, RetryPolicy, RetryableClient};
