//! Data-Plane Client
//!
//! Main client for issuing CRUD and action calls against any resource that can
//! be addressed by a cloud path and an API version.

use super::auth::TokenCredential;
use super::environment::CloudConfiguration;
use super::http::{self, PreparedRequest};
use super::pipeline::{PipelineCache, PipelineOptions, TransportOptions};
use super::poller::{Poller, DEFAULT_POLL_FREQUENCY};
use super::retry::{RetryPolicy, RetryableClient};
use crate::error::Result;
use crate::resource::{self, ResourceId};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CREATE_STATUSES: &[StatusCode] = &[StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED];
const READ_STATUSES: &[StatusCode] = &[StatusCode::OK];
const DELETE_STATUSES: &[StatusCode] = &[StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT];
const ACTION_STATUSES: &[StatusCode] = &[StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED];

/// The four operations every data-plane client offers.
///
/// Implemented by [`DataPlaneClient`] and by the retrying decorator, so callers
/// (and tests) can swap one for the other.
#[async_trait]
pub trait DataPlaneRequester: Send + Sync {
    /// PUT the body and wait for any long-running operation to finish
    async fn create_or_update(
        &self,
        id: &ResourceId,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>>;

    /// GET the resource
    async fn get(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Option<Value>>;

    /// DELETE the resource and wait for any long-running operation to finish
    async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Option<Value>>;

    /// Call `{id}/{action}` with an arbitrary method. An empty `action` targets
    /// the resource itself; the body is ignored for GET.
    async fn action(
        &self,
        id: &ResourceId,
        action: &str,
        method: Method,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>>;
}

/// Client construction options
#[derive(Clone)]
pub struct ClientOptions {
    pub credential: Arc<dyn TokenCredential>,
    pub cloud: CloudConfiguration,
    pub transport: TransportOptions,
    /// Prepended to the User-Agent
    pub application_id: Option<String>,
    /// Wait between long-running operation polls
    pub poll_frequency: Duration,
}

impl ClientOptions {
    /// Public cloud, default transport, 10 second polling
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            credential,
            cloud: CloudConfiguration::public(),
            transport: TransportOptions::default(),
            application_id: None,
            poll_frequency: DEFAULT_POLL_FREQUENCY,
        }
    }

    pub fn with_cloud(mut self, cloud: CloudConfiguration) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_application_id(mut self, application_id: &str) -> Self {
        self.application_id = Some(application_id.to_string());
        self
    }

    pub fn with_poll_frequency(mut self, frequency: Duration) -> Self {
        self.poll_frequency = frequency;
        self
    }
}

/// Data-plane client
pub struct DataPlaneClient {
    pipelines: PipelineCache,
    poll_frequency: Duration,
}

impl DataPlaneClient {
    /// Create a new client; no network traffic happens until the first call
    pub fn new(options: ClientOptions) -> Result<Self> {
        let pipeline_options =
            PipelineOptions::new(options.application_id.as_deref(), options.transport);
        let pipelines = PipelineCache::new(options.credential, options.cloud, pipeline_options)?;

        Ok(Self {
            pipelines,
            poll_frequency: options.poll_frequency,
        })
    }

    /// Wrap this client in a retrying decorator
    pub fn with_retry(self: Arc<Self>, policy: RetryPolicy) -> RetryableClient {
        RetryableClient::new(self, policy)
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Build, send, validate and (optionally) poll one request
    async fn execute(&self, call: Call<'_>, cancel: &CancellationToken) -> Result<Option<Value>> {
        let request = PreparedRequest::new(call.method, call.url, call.api_version, call.body)?;
        let pipeline = self.pipelines.get(request.url.as_str())?;

        tracing::debug!(
            "{} {} (service {})",
            request.method,
            request.url,
            pipeline.service_name()
        );

        let response = pipeline.send(&request, cancel).await?;
        http::ensure_status(&request.method, &request.url, &response, call.accepted)?;

        if call.poll {
            if let Some(poller) = Poller::from_response(
                &request.method,
                &request.url,
                &response,
                self.poll_frequency,
            )? {
                return poller.poll_until_done(&pipeline, cancel).await;
            }
        }

        response.payload()
    }
}

/// One outbound request as the executor sees it
struct Call<'a> {
    method: Method,
    url: &'a str,
    api_version: &'a str,
    body: Option<&'a Value>,
    accepted: &'static [StatusCode],
    /// Hand LRO responses to the poller
    poll: bool,
}

#[async_trait]
impl DataPlaneRequester for DataPlaneClient {
    async fn create_or_update(
        &self,
        id: &ResourceId,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let url = id.url();
        let call = Call {
            method: Method::PUT,
            url: &url,
            api_version: id.api_version(),
            body: Some(body),
            accepted: CREATE_STATUSES,
            poll: true,
        };
        self.execute(call, cancel).await
    }

    async fn get(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Option<Value>> {
        let url = id.url();
        let call = Call {
            method: Method::GET,
            url: &url,
            api_version: id.api_version(),
            body: None,
            accepted: READ_STATUSES,
            poll: false,
        };
        self.execute(call, cancel).await
    }

    async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Option<Value>> {
        let url = id.url();
        let call = Call {
            method: Method::DELETE,
            url: &url,
            api_version: id.api_version(),
            body: None,
            accepted: DELETE_STATUSES,
            poll: true,
        };
        self.execute(call, cancel).await
    }

    async fn action(
        &self,
        id: &ResourceId,
        action: &str,
        method: Method,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let url = match action.trim_matches('/') {
            "" => id.url(),
            action => resource::to_url(&format!(
                "{}/{}",
                id.cloud_path().trim_end_matches('/'),
                action
            )),
        };
        let call = Call {
            method,
            url: &url,
            api_version: id.api_version(),
            body,
            accepted: ACTION_STATUSES,
            poll: true,
        };
        self.execute(call, cancel).await
    }
}
