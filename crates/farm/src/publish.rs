//! Reports and the publishers that deliver them.
//!
//! A [`Report`] is a snapshot of one bot's sensor values, numbered
//! `field1..field8` in configuration order.  Delivery goes through the
//! [`Publisher`] trait so the scheduler never cares whether readings leave
//! over HTTP, MQTT, or only reach the log.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{Backend, PublisherEntry};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One numbered field of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    /// 1-based field number.
    pub index: usize,
    pub value: f64,
    #[serde(skip)]
    pub precision: u8,
}

impl Field {
    pub fn key(&self) -> String {
        format!("field{}", self.index)
    }

    /// Value with exactly `precision` decimals.
    pub fn formatted(&self) -> String {
        format!("{:.*}", self.precision as usize, self.value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub bot: String,
    pub channel: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    pub fields: Vec<Field>,
}

impl Report {
    /// Query parameters for the HTTP update endpoint: the write key first,
    /// then every field in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.fields.len() + 1);
        pairs.push(("api_key".to_string(), self.api_key.clone()));
        pairs.extend(self.fields.iter().map(|f| (f.key(), f.formatted())));
        pairs
    }

    /// `field1=..&field2=..` body used by the MQTT backend.
    pub fn field_payload(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}={}", f.key(), f.formatted()))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// A copy of this report carrying only `field`.
    pub fn single(&self, field: &Field) -> Report {
        Report {
            fields: vec![field.clone()],
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher trait
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("mqtt error: {0}")]
    Mqtt(String),

    #[error("publish task failed: {0}")]
    Join(String),
}

/// Delivers reports to the telemetry endpoint.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, report: &Report) -> Result<(), PublishError>;
}

/// Logs reports instead of sending them.
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, report: &Report) -> Result<(), PublishError> {
        let body = serde_json::to_string(report).unwrap_or_default();
        info!(bot = %report.bot, channel = %report.channel, report = %body, "dry run");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded exponential backoff around a single publish.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before the 1-based `attempt`.  The first attempt is immediate;
    /// attempt `n` waits `backoff * 2^(n-2)`, capped at `max_backoff`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Publish `report`, retrying per `policy`.  Returns the last error once
/// every attempt has failed.
pub async fn publish_with_retry(
    publisher: &dyn Publisher,
    report: &Report,
    policy: &RetryPolicy,
) -> Result<(), PublishError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match publisher.publish(report).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                warn!(
                    bot = %report.bot,
                    attempt,
                    max_attempts = attempts,
                    ?delay,
                    "publish failed: {e}. retrying..."
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// How a bot's readings are split into requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStrategy {
    /// One request carrying every field.
    #[default]
    Aggregate,
    /// One request per sensor field.
    PerSensor,
}

/// Publisher plus the delivery policy applied to every report.
#[derive(Clone)]
pub struct Dispatcher {
    publisher: Arc<dyn Publisher>,
    strategy: PublishStrategy,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, strategy: PublishStrategy, retry: RetryPolicy) -> Self {
        Self {
            publisher,
            strategy,
            retry,
        }
    }

    /// Build the configured backend.
    pub fn from_config(entry: &PublisherEntry) -> Result<Self> {
        let publisher: Arc<dyn Publisher> = match entry.backend {
            Backend::Http => Arc::new(crate::http::HttpPublisher::new(
                &entry.url,
                Duration::from_secs(entry.timeout_secs),
            )),
            #[cfg(feature = "mqtt")]
            Backend::Mqtt => Arc::new(crate::mqtt::MqttPublisher::connect(
                &entry.host,
                entry.port,
                Duration::from_secs(entry.timeout_secs),
            )),
            #[cfg(not(feature = "mqtt"))]
            Backend::Mqtt => anyhow::bail!("mqtt backend requested but this build has no MQTT support"),
            Backend::DryRun => Arc::new(DryRunPublisher),
        };

        let retry = RetryPolicy {
            max_attempts: entry.max_attempts,
            backoff: Duration::from_millis(entry.backoff_ms),
            max_backoff: Duration::from_millis(entry.max_backoff_ms),
        };

        info!(
            backend = ?entry.backend,
            strategy = ?entry.strategy,
            max_attempts = retry.max_attempts,
            "publisher ready"
        );

        Ok(Self::new(publisher, entry.strategy, retry))
    }

    pub fn strategy(&self) -> PublishStrategy {
        self.strategy
    }

    /// Deliver `report` according to the strategy.  With `PerSensor`, every
    /// field is attempted and the first failure is returned.
    pub async fn send(&self, report: &Report) -> Result<(), PublishError> {
        match self.strategy {
            PublishStrategy::Aggregate => {
                publish_with_retry(self.publisher.as_ref(), report, &self.retry).await
            }
            PublishStrategy::PerSensor => {
                let mut first_err = None;
                for field in &report.fields {
                    let single = report.single(field);
                    if let Err(e) = publish_with_retry(self.publisher.as_ref(), &single, &self.retry).await {
                        warn!(bot = %report.bot, field = %field.key(), "field not delivered: {e}");
                        first_err.get_or_insert(e);
                    }
                }
                first_err.map_or(Ok(()), Err)
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
