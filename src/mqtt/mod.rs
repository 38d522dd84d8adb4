use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::{sync::mpsc::error::TrySendError, time};
use tracing::{debug, info, warn};

use crate::{config::MqttConfig, ingest::bus::DeliverySender};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Forwards every message published on the configured topic into the
/// delivery queue.
///
/// Connection upkeep is left to `rumqttc`; this only resubscribes after
/// each (re)connect and hands payloads on.
pub struct MqttBridge {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttBridge {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options
            .set_keep_alive(Duration::from_secs(30))
            .set_credentials(&config.username, &config.password);
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, 16);
        Self {
            client,
            eventloop,
            topic: config.topic.clone(),
        }
    }

    /// Runs until the delivery queue is closed.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(mut self, sender: DeliverySender) -> Result<()> {
        info!(topic = %self.topic, "MQTT bridge started");

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %self.topic, "Connected to broker; subscribing");
                    self.client
                        .subscribe(self.topic.as_str(), QoS::AtLeastOnce)
                        .await
                        .context("Failed to queue MQTT subscribe request")?;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "MQTT message received");
                    match sender.try_send(publish.payload.to_vec()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                topic = %publish.topic,
                                "Delivery queue full; dropping MQTT message"
                            );
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("Delivery queue closed; stopping MQTT bridge");
                            return Ok(());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error; retrying");
                    time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
