//! MQTT channel-feed publisher.
//!
//! Reports go to `channels/<channel>/publish/<api_key>` with a
//! `field1=..&field2=..` payload.  The event loop runs in its own task,
//! reconnects on error, and reports the link state through a watch channel.
//! `publish` fails while the broker is unreachable and never waits on a full
//! request queue, so an outage turns into ordinary publish errors.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::publish::{PublishError, Publisher, Report};

/// Request queue depth between the client and its event loop.
const QUEUE_CAPACITY: usize = 20;

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

/// Topic for updating a channel feed: `channels/<channel>/publish/<api_key>`.
pub(crate) fn publish_topic(channel: &str, api_key: &str) -> String {
    format!("channels/{channel}/publish/{api_key}")
}

// ---------------------------------------------------------------------------
// Link state
// ---------------------------------------------------------------------------

/// Broker connection as last seen by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Link {
    /// No ConnAck or error seen yet.
    Connecting,
    Up,
    /// Last connection error.
    Down(String),
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct MqttPublisher {
    client: AsyncClient,
    link: watch::Receiver<Link>,
    /// How long `publish` waits for the first connection attempt to settle.
    timeout: Duration,
}

impl MqttPublisher {
    /// Create the client and spawn its event loop.  Must be called from
    /// inside a tokio runtime.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Self {
        let client_id = format!("botfarm-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, QUEUE_CAPACITY);
        let (link_tx, link) = watch::channel(Link::Connecting);

        // We only publish, but the event loop must run to keep the
        // connection alive and flush queued messages.
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to mqtt broker");
                        link_tx.send_replace(Link::Up);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt error: {e}. retrying...");
                        link_tx.send_replace(Link::Down(e.to_string()));
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            link,
            timeout,
        }
    }

    #[cfg(test)]
    fn from_parts(client: AsyncClient, link: watch::Receiver<Link>, timeout: Duration) -> Self {
        Self {
            client,
            link,
            timeout,
        }
    }

    /// Current link state, waiting up to `timeout` while still connecting.
    async fn settled_link(&self) -> Result<Link, PublishError> {
        let mut rx = self.link.clone();
        let outcome = timeout(self.timeout, rx.wait_for(|l| *l != Link::Connecting))
            .await
            .map(|r| r.map(|state| state.clone()));

        match outcome {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(PublishError::Mqtt("mqtt event loop stopped".to_string())),
            Err(_) => Err(PublishError::Mqtt(format!(
                "no broker connection after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, report: &Report) -> Result<(), PublishError> {
        if let Link::Down(reason) = self.settled_link().await? {
            return Err(PublishError::Mqtt(format!("broker unreachable: {reason}")));
        }

        let topic = publish_topic(&report.channel, &report.api_key);
        let payload = report.field_payload();

        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.clone().into_bytes())
            .map_err(|e| PublishError::Mqtt(format!("request not queued: {e}")))?;

        debug!(bot = %report.bot, channel = %report.channel, payload = %payload, "queued mqtt update");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
