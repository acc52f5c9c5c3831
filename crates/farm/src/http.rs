//! HTTP update-endpoint publisher.
//!
//! Each report becomes one `GET <url>?api_key=<key>&field1=..&fieldN=..`.
//! ureq is blocking, so requests run on tokio's blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::publish::{PublishError, Publisher, Report};

pub struct HttpPublisher {
    agent: ureq::Agent,
    url: String,
}

impl HttpPublisher {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("botfarm/", env!("CARGO_PKG_VERSION")))
            .build();

        Self {
            agent,
            url: url.to_string(),
        }
    }
}

fn map_ureq_error(err: ureq::Error) -> PublishError {
    match err {
        ureq::Error::Status(status, resp) => PublishError::Status {
            status,
            body: resp.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(t) => PublishError::Transport(t.to_string()),
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, report: &Report) -> Result<(), PublishError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let pairs = report.query_pairs();

        let body = tokio::task::spawn_blocking(move || -> Result<String, PublishError> {
            let mut req = agent.get(&url);
            for (key, value) in &pairs {
                req = req.query(key, value);
            }
            let resp = req.call().map_err(map_ureq_error)?;
            resp.into_string()
                .map_err(|e| PublishError::Transport(e.to_string()))
        })
        .await
        .map_err(|e| PublishError::Join(e.to_string()))??;

        // The endpoint answers with the new entry id, or "0" when it
        // dropped the update (rate limit, bad key).
        let entry = body.trim();
        if entry == "0" {
            warn!(bot = %report.bot, channel = %report.channel, "update not accepted by endpoint");
        } else {
            debug!(bot = %report.bot, channel = %report.channel, entry, "update accepted");
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
