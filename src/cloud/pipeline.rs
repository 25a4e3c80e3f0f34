//! Transport Pipelines
//!
//! A [`Pipeline`] is the chain every request goes through: request id,
//! bearer-token authorization for one service audience, send, and
//! transport-level retry of throttled or unavailable responses.
//!
//! [`PipelineCache`] builds at most one pipeline per cloud service name and
//! hands the same instance to every caller afterwards.

use super::auth::{BearerTokenPolicy, TokenCredential};
use super::environment::CloudConfiguration;
use super::http::{self, PreparedRequest, ReceivedResponse};
use crate::error::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Statuses the transport retries on its own
const RETRY_STATUSES: &[StatusCode] = &[
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Transport-level retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Extra attempts after the first; 0 disables transport retry
    pub max_retries: u32,
    /// First delay, doubled on every further attempt
    #[serde(with = "millis")]
    pub retry_delay: Duration,
    #[serde(with = "millis")]
    pub max_retry_delay: Duration,
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(800),
            max_retry_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(300),
        }
    }
}

impl TransportOptions {
    /// No transport retries at all
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// One authorized transport chain bound to a single service
pub struct Pipeline {
    service_name: String,
    http: Client,
    auth: BearerTokenPolicy,
    transport: TransportOptions,
}

impl Pipeline {
    pub fn new(
        service_name: &str,
        http: Client,
        auth: BearerTokenPolicy,
        transport: TransportOptions,
    ) -> Self {
        Self {
            service_name: service_name.to_string(),
            http,
            auth,
            transport,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn scopes(&self) -> &[String] {
        self.auth.scopes()
    }

    /// Send a request and read its body, retrying throttled/unavailable
    /// responses and send failures up to the transport budget. Any status is
    /// returned as-is; it is the caller's job to decide what is acceptable.
    pub(crate) async fn send(
        &self,
        request: &PreparedRequest,
        cancel: &CancellationToken,
    ) -> Result<ReceivedResponse> {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Cancellation covers token acquisition as well as the send
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.execute(request) => result?,
            };

            let retry_after = match &result {
                Ok(response) if RETRY_STATUSES.contains(&response.status) => {
                    http::retry_after(&response.headers)
                }
                Ok(_) => return result.map_err(Error::from),
                Err(err) if err.is_builder() => return result.map_err(Error::from),
                Err(_) => None,
            };

            if attempt >= self.transport.max_retries {
                return result.map_err(Error::from);
            }
            attempt += 1;

            let delay = retry_after
                .unwrap_or_else(|| self.transport.delay_for(attempt))
                .min(self.transport.max_retry_delay);
            match &result {
                Ok(response) => tracing::warn!(
                    "{} {} returned {}, transport retry {}/{} in {:?}",
                    request.method,
                    request.url,
                    response.status,
                    attempt,
                    self.transport.max_retries,
                    delay
                ),
                Err(err) => tracing::warn!(
                    "{} {} failed: {}, transport retry {}/{} in {:?}",
                    request.method,
                    request.url,
                    err,
                    attempt,
                    self.transport.max_retries,
                    delay
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Authorize and send one attempt. The outer error is a failure to build
    /// the request; the inner one is a send or read failure worth retrying.
    async fn execute(
        &self,
        request: &PreparedRequest,
    ) -> Result<std::result::Result<ReceivedResponse, reqwest::Error>> {
        let outgoing = self.build(request).await?;
        Ok(match self.http.execute(outgoing).await {
            Ok(response) => ReceivedResponse::read(response).await,
            Err(err) => Err(err),
        })
    }

    async fn build(&self, request: &PreparedRequest) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(self.transport.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(self.auth.authorize(builder).await?.build()?)
    }
}

/// Settings shared by every pipeline a cache builds
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub user_agent: String,
    pub transport: TransportOptions,
}

impl PipelineOptions {
    pub fn new(application_id: Option<&str>, transport: TransportOptions) -> Self {
        let base = format!("dataplane-client/{}", crate::VERSION);
        let user_agent = match application_id {
            Some(app) if !app.is_empty() => format!("{} {}", app, base),
            _ => base,
        };
        Self {
            user_agent,
            transport,
        }
    }
}

/// Lazily built, never evicted, one pipeline per service name
pub struct PipelineCache {
    credential: Arc<dyn TokenCredential>,
    cloud: CloudConfiguration,
    http: Client,
    transport: TransportOptions,
    pipelines: Mutex<HashMap<String, Arc<Pipeline>>>,
}

impl PipelineCache {
    pub fn new(
        credential: Arc<dyn TokenCredential>,
        cloud: CloudConfiguration,
        options: PipelineOptions,
    ) -> Result<Self> {
        let http = Client::builder().user_agent(options.user_agent).build()?;

        Ok(Self {
            credential,
            cloud,
            http,
            transport: options.transport,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    pub fn cloud(&self) -> &CloudConfiguration {
        &self.cloud
    }

    /// Service name a URL belongs to
    pub fn resolve_service(&self, raw_url: &str) -> Result<String> {
        let authority = authority(raw_url)?;
        Ok(self.cloud.resolve_service(&authority).to_string())
    }

    /// Pipeline for the service `raw_url` targets, built on first use
    pub fn get(&self, raw_url: &str) -> Result<Arc<Pipeline>> {
        let service_name = self.resolve_service(raw_url)?;

        // Lookup and insert happen under one lock so concurrent callers
        // never build two pipelines for the same service.
        let mut pipelines = self
            .pipelines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(pipeline) = pipelines.get(&service_name) {
            return Ok(pipeline.clone());
        }

        let service = self
            .cloud
            .service(&service_name)
            .ok_or_else(|| Error::UnknownService(service_name.clone()))?;

        let auth = BearerTokenPolicy::new(self.credential.clone(), vec![service.scope()]);
        let pipeline = Arc::new(Pipeline::new(
            &service_name,
            self.http.clone(),
            auth,
            self.transport.clone(),
        ));
        tracing::debug!(
            "Built pipeline for service {} (scope {})",
            service_name,
            service.scope()
        );

        pipelines.insert(service_name, pipeline.clone());
        Ok(pipeline)
    }

    /// Number of pipelines built so far
    pub fn len(&self) -> usize {
        self.pipelines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `host[:port]` of a URL
pub(crate) fn authority(raw_url: &str) -> Result<String> {
    let url = Url::parse(raw_url).map_err(|source| Error::UrlParse {
        url: raw_url.to_string(),
        source,
    })?;
    let host = url.host_str().ok_or_else(|| Error::UrlParse {
        url: raw_url.to_string(),
        source: url::ParseError::EmptyHost,
    })?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
