//! MQTT transport for the flight data feed

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};

use crate::{config::MqttConfig, errors::EramError};

/// Builder for the feed subscriber
pub struct MqttClientBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    topics: Vec<String>,
}

/// Running subscriber. Payloads are forwarded to the channel given to
/// [`MqttClientBuilder::connect`].
pub struct MqttClient {
    _client: AsyncClient,
    _handle: tokio::task::JoinHandle<Result<(), EramError>>,
}

impl MqttClientBuilder {
    pub fn new(config: &MqttConfig) -> Result<Self, EramError> {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.uri, config.port);

        if config.websocket {
            mqtt_options.set_transport(Transport::wss_with_default_config());
        }
        mqtt_options.set_keep_alive(Duration::from_secs(5));
        mqtt_options.set_max_packet_size(4 * 1024 * 1024, 4 * 1024 * 1024);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        Ok(Self {
            client,
            event_loop,
            topics: config.topics.clone(),
        })
    }

    /// Start the event loop, forwarding every payload to `tx`
    ///
    /// Subscription happens in the event loop on each connection
    /// acknowledgement.
    pub async fn connect(self, tx: mpsc::Sender<String>) -> Result<MqttClient, EramError> {
        let _handle = tokio::spawn(Self::process_events(
            tx,
            self.event_loop,
            self.client.clone(),
            self.topics,
        ));

        Ok(MqttClient {
            _client: self.client,
            _handle,
        })
    }

    async fn subscribe(client: AsyncClient, topics: &[String]) -> Result<(), EramError> {
        for topic in topics.iter() {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects on its own, but subscriptions have to be made
    /// again after every reconnect. The loop ends when subscribing fails or
    /// when the receiving side of the channel is gone.
    async fn process_events(
        tx: mpsc::Sender<String>,
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Vec<String>,
    ) -> Result<(), EramError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to topics");
                    if let Err(e) = Self::subscribe(client.clone(), &topics).await {
                        error!("Failed to subscribe: {}", e);
                        break Err(e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match decode_payload(&publish.topic, &publish.payload) {
                        Some(payload) => {
                            if tx.send(payload).await.is_err() {
                                info!("Message channel closed, stopping MQTT event loop");
                                break Err(EramError::ChannelClosed);
                            }
                        }
                        None => continue,
                    }
                }
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    continue;
                }
                _ => continue,
            }
        }
    }
}

/// Payload text of a publish, or `None` when it is not UTF-8
fn decode_payload(topic: &str, payload: &[u8]) -> Option<String> {
    match std::str::from_utf8(payload) {
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            warn!("Dropping non UTF-8 payload on {}: {}", topic, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_utf8_payload() {
        let payload = "<MessageCollection/>".as_bytes();
        assert_eq!(
            decode_payload("flights/ZJX", payload),
            Some("<MessageCollection/>".to_string())
        );
    }

    #[test]
    fn drop_invalid_payload() {
        assert_eq!(decode_payload("flights/ZJX", &[0x3c, 0xff, 0xfe]), None);
    }

    #[tokio::test]
    async fn builder_from_config() {
        let config = MqttConfig {
            uri: "localhost".to_string(),
            port: 1883,
            websocket: false,
            topics: vec!["flights/#".to_string()],
            client_id: "eram-test".to_string(),
        };
        let builder = MqttClientBuilder::new(&config).unwrap();
        assert_eq!(builder.topics, vec!["flights/#"]);
    }
}
