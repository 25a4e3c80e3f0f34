//! Retry Decorator
//!
//! Wraps any [`DataPlaneRequester`] call in an exponential backoff loop. An
//! error is retried only when its message matches one of the configured
//! patterns; anything else is permanent and returned on the spot.

use super::client::DataPlaneRequester;
use crate::error::{Error, Result};
use crate::resource::ResourceId;
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use reqwest::Method;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoffConfig {
    pub initial_interval: Duration,
    /// Each delay is spread by +/- this fraction
    pub randomization_factor: f64,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Stop retrying once this much time has passed; `None` retries forever
    pub max_elapsed_time: Option<Duration>,
}

impl Default for ExponentialBackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            randomization_factor: 0.5,
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Some(Duration::from_secs(15 * 60)),
        }
    }
}

/// Backoff state for one top-level call
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: ExponentialBackoffConfig,
    current_interval: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: ExponentialBackoffConfig) -> Self {
        Self {
            current_interval: config.initial_interval,
            config,
            started: Instant::now(),
        }
    }

    /// Next delay, or `None` once the elapsed-time budget is spent
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let next = randomize(self.current_interval, self.config.randomization_factor);

        self.current_interval = self
            .current_interval
            .mul_f64(self.config.multiplier.max(1.0))
            .min(self.config.max_interval);

        if let Some(max_elapsed) = self.config.max_elapsed_time {
            if self.started.elapsed() + next > max_elapsed {
                return None;
            }
        }
        Some(next)
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * factor.min(1.0);
    let spread = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(spread.max(0.0))
}

/// When and how long to retry
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    backoff: Option<ExponentialBackoffConfig>,
    patterns: Vec<Regex>,
}

impl RetryPolicy {
    pub fn new(backoff: ExponentialBackoffConfig, patterns: Vec<Regex>) -> Self {
        Self {
            backoff: Some(backoff),
            patterns,
        }
    }

    /// Compile `patterns` and build a policy
    pub fn from_patterns<I, S>(backoff: ExponentialBackoffConfig, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| Error::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(backoff, patterns))
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    /// The backoff, provided the policy has both a backoff and patterns
    fn configured_backoff(&self) -> Result<&ExponentialBackoffConfig> {
        let backoff = self
            .backoff
            .as_ref()
            .ok_or_else(|| Error::NotConfigured("no backoff policy set".to_string()))?;
        if self.patterns.is_empty() {
            return Err(Error::NotConfigured(
                "no retryable error patterns set".to_string(),
            ));
        }
        Ok(backoff)
    }

    /// First pattern matching the error message, if any
    pub fn matching_pattern(&self, err: &Error) -> Option<&Regex> {
        if matches!(err, Error::Cancelled | Error::NotConfigured(_)) {
            return None;
        }
        let message = err.to_string();
        self.patterns.iter().find(|p| p.is_match(&message))
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        self.matching_pattern(err).is_some()
    }
}

/// Retrying decorator around another requester
#[derive(Clone)]
pub struct RetryableClient {
    inner: Arc<dyn DataPlaneRequester>,
    policy: RetryPolicy,
}

impl RetryableClient {
    pub fn new(inner: Arc<dyn DataPlaneRequester>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// backoff budget, or `cancel` fires. Each call starts a fresh backoff.
    pub async fn retry<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut backoff = ExponentialBackoff::new(self.policy.configured_backoff()?.clone());
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(pattern) = self.policy.matching_pattern(&err) else {
                tracing::debug!("Attempt {} failed permanently: {}", attempt, err);
                return Err(err);
            };

            let Some(delay) = backoff.next_backoff() else {
                tracing::warn!("Retry budget exhausted after {} attempts: {}", attempt, err);
                return Err(err);
            };

            tracing::warn!(
                "Attempt {} matched retry pattern `{}`, retrying in {:?}",
                attempt,
                pattern.as_str(),
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl DataPlaneRequester for RetryableClient {
    async fn create_or_update(
        &self,
        id: &ResourceId,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        self.retry(cancel, || {
            let inner = self.inner.clone();
            async move { inner.create_or_update(id, body, cancel).await }
        })
        .await
    }

    async fn get(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Option<Value>> {
        self.retry(cancel, || {
            let inner = self.inner.clone();
            async move { inner.get(id, cancel).await }
        })
        .await
    }

    async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Option<Value>> {
        self.retry(cancel, || {
            let inner = self.inner.clone();
            async move { inner.delete(id, cancel).await }
        })
        .await
    }

    async fn action(
        &self,
        id: &ResourceId,
        action: &str,
        method: Method,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        self.retry(cancel, || {
            let inner = self.inner.clone();
            let method = method.clone();
            async move { inner.action(id, action, method, body, cancel).await }
        })
        .await
    }
}
