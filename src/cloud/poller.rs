//! Long-Running Operations
//!
//! Recognizes responses that start an asynchronous operation and polls them to
//! a terminal state. Four conventions are understood:
//!
//! - `Azure-AsyncOperation`: a status monitor URL returning `{"status": ...}`
//! - `Operation-Location`: same shape, final resource may be named in the body
//! - `Location` on a `202`: poll the location until it stops answering `202`
//! - `properties.provisioningState` in a PUT/PATCH body: re-read the resource

use super::http::{self, PreparedRequest, ReceivedResponse};
use super::pipeline::Pipeline;
use crate::error::{Error, PollError, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const OPERATION_LOCATION_HEADER: &str = "operation-location";
const LOCATION_HEADER: &str = "location";

/// Default wait between status polls
pub const DEFAULT_POLL_FREQUENCY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" | "canceled" | "cancelled" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    /// Status monitor (`Azure-AsyncOperation` or `Operation-Location`)
    StatusMonitor {
        status_url: Url,
        location: Option<Url>,
        operation_location: bool,
    },
    /// `Location` header on a 202
    Location { url: Url },
    /// Provisioning state in the resource body
    Body,
}

/// Drives one accepted operation to completion
#[derive(Debug)]
pub(crate) struct Poller {
    method: Method,
    resource_url: Url,
    strategy: Strategy,
    frequency: Duration,
}

impl Poller {
    /// Poller for `response`, or `None` if it is not an asynchronous
    /// operation. A body that is already in a failed provisioning state is
    /// reported as a [`PollError`].
    pub fn from_response(
        method: &Method,
        resource_url: &Url,
        response: &ReceivedResponse,
        frequency: Duration,
    ) -> Result<Option<Self>> {
        let location = response
            .header(LOCATION_HEADER)
            .and_then(|l| resolve(resource_url, l));

        let strategy = if let Some(status_url) = response
            .header(ASYNC_OPERATION_HEADER)
            .and_then(|u| resolve(resource_url, u))
        {
            Strategy::StatusMonitor {
                status_url,
                location,
                operation_location: false,
            }
        } else if let Some(status_url) = response
            .header(OPERATION_LOCATION_HEADER)
            .and_then(|u| resolve(resource_url, u))
        {
            Strategy::StatusMonitor {
                status_url,
                location,
                operation_location: true,
            }
        } else if let Some(url) = location.filter(|_| response.status == StatusCode::ACCEPTED) {
            Strategy::Location { url }
        } else if is_put_or_patch(method)
            && (response.status == StatusCode::OK || response.status == StatusCode::CREATED)
        {
            let body = response.json().ok().flatten();
            match body.as_ref().and_then(provisioning_state) {
                Some(state) => match OperationState::from_status(state) {
                    OperationState::InProgress => Strategy::Body,
                    OperationState::Succeeded => return Ok(None),
                    OperationState::Failed => {
                        return Err(PollError {
                            status: state.to_string(),
                            payload: body.clone(),
                        }
                        .into())
                    }
                },
                None => return Ok(None),
            }
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            method: method.clone(),
            resource_url: resource_url.clone(),
            strategy,
            frequency,
        }))
    }

    /// Poll until a terminal state, waiting `frequency` between polls.
    pub async fn poll_until_done(
        &self,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        tracing::info!(
            "Polling long-running {} {} every {:?}",
            self.method,
            self.resource_url,
            self.frequency
        );

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if let Some(result) = self.poll_once(pipeline, cancel).await? {
                tracing::info!(
                    "Long-running {} {} succeeded",
                    self.method,
                    self.resource_url
                );
                return Ok(result);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.frequency) => {}
            }
        }
    }

    /// One status check. `Some(result)` once the operation has succeeded.
    async fn poll_once(
        &self,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<Option<Option<Value>>> {
        match &self.strategy {
            Strategy::StatusMonitor {
                status_url,
                location,
                operation_location,
            } => {
                let response = self.get(pipeline, status_url, cancel).await?;
                http::ensure_status(&Method::GET, status_url, &response, &MONITOR_STATUSES)?;

                let payload = response.json()?;
                let Some(status) = payload
                    .as_ref()
                    .and_then(|p| p.get("status"))
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
                else {
                    tracing::error!("Status monitor {} returned no status", status_url);
                    return Err(PollError {
                        status: String::new(),
                        payload,
                    }
                    .into());
                };

                match OperationState::from_status(&status) {
                    OperationState::InProgress => {
                        tracing::debug!("Operation {} is {}", status_url, status);
                        Ok(None)
                    }
                    OperationState::Failed => Err(PollError { status, payload }.into()),
                    OperationState::Succeeded => {
                        let final_url = self.final_url(location.as_ref(), *operation_location, payload.as_ref());
                        match final_url {
                            Some(url) => self.final_get(pipeline, &url, cancel).await.map(Some),
                            None if self.method == Method::POST => Ok(Some(
                                payload.and_then(|p| p.get("properties").cloned()),
                            )),
                            None => Ok(Some(None)),
                        }
                    }
                }
            }
            Strategy::Location { url } => {
                let response = self.get(pipeline, url, cancel).await?;
                if response.status == StatusCode::ACCEPTED {
                    tracing::debug!("Operation {} still accepted", url);
                    return Ok(None);
                }
                http::ensure_status(&Method::GET, url, &response, &SUCCESS_STATUSES)?;
                Ok(Some(response.payload()?))
            }
            Strategy::Body => {
                let response = self.get(pipeline, &self.resource_url, cancel).await?;
                http::ensure_status(&Method::GET, &self.resource_url, &response, &BODY_STATUSES)?;

                let payload = response.json()?;
                let state = payload
                    .as_ref()
                    .and_then(provisioning_state)
                    .unwrap_or("Succeeded")
                    .to_string();
                match OperationState::from_status(&state) {
                    OperationState::InProgress => Ok(None),
                    OperationState::Failed => Err(PollError {
                        status: state,
                        payload,
                    }
                    .into()),
                    OperationState::Succeeded => Ok(Some(response.payload()?)),
                }
            }
        }
    }

    /// Where to read the result once a status monitor reports success
    fn final_url(
        &self,
        location: Option<&Url>,
        operation_location: bool,
        payload: Option<&Value>,
    ) -> Option<Url> {
        if self.method == Method::DELETE {
            return None;
        }
        if is_put_or_patch(&self.method) {
            return Some(self.resource_url.clone());
        }
        if operation_location {
            if let Some(url) = payload
                .and_then(|p| p.get("resourceLocation"))
                .and_then(|l| l.as_str())
                .and_then(|l| resolve(&self.resource_url, l))
            {
                return Some(url);
            }
        }
        location.cloned()
    }

    async fn final_get(
        &self,
        pipeline: &Pipeline,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let response = self.get(pipeline, url, cancel).await?;
        http::ensure_status(&Method::GET, url, &response, &SUCCESS_STATUSES)?;
        response.payload()
    }

    async fn get(
        &self,
        pipeline: &Pipeline,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<ReceivedResponse> {
        let request = PreparedRequest::get(url.clone());
        pipeline.send(&request, cancel).await
    }
}

const SUCCESS_STATUSES: [StatusCode; 3] = [StatusCode::OK, StatusCode::CREATED, StatusCode::NO_CONTENT];

/// Status monitors may answer 202 while the operation runs; `status` decides
const MONITOR_STATUSES: [StatusCode; 4] = [
    StatusCode::OK,
    StatusCode::CREATED,
    StatusCode::ACCEPTED,
    StatusCode::NO_CONTENT,
];

/// A 204 re-read has no provisioning state and counts as succeeded
const BODY_STATUSES: [StatusCode; 2] = [StatusCode::OK, StatusCode::NO_CONTENT];

fn is_put_or_patch(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::PATCH
}

fn provisioning_state(body: &Value) -> Option<&str> {
    body.get("properties")
        .and_then(|p| p.get("provisioningState"))
        .and_then(|s| s.as_str())
}

/// Header values may be relative to the request URL
fn resolve(base: &Url, value: &str) -> Option<Url> {
    if value.is_empty() {
        return None;
    }
    base.join(value).ok()
}
