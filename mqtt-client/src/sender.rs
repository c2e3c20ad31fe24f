use crate::{error::Result, mqtt_options};
use async_trait::async_trait;
use log::debug;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::time::Duration;

/// Something telemetry can be published through.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic` with at-least-once delivery.
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MqttSender {
    client: AsyncClient,
}

impl MqttSender {
    /// Create a client for `host:port`. The returned [`EventLoop`] must be
    /// driven (see [`MqttReceiver::from_client`](crate::MqttReceiver::from_client))
    /// for anything to reach the broker.
    pub fn new(client_id: &str, host: &str, port: u16, keep_alive: Duration) -> (Self, EventLoop) {
        let options = mqtt_options(client_id, host, port, keep_alive);
        let (client, eventloop) = AsyncClient::new(options, 10);

        (Self { client }, eventloop)
    }

    pub fn from_client(client: AsyncClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

#[async_trait]
impl Publisher for MqttSender {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .await?;

        debug!("Published message to topic: {}", topic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}
