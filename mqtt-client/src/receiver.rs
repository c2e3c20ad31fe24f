use crate::{
    error::Result,
    event::{ConnectionState, TransportEvent, spawn_event_pump},
    mqtt_options,
};
use log::{info, warn};
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::{Stream, wrappers::ReceiverStream};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Owns a connection's event loop and yields its [`TransportEvent`]s.
///
/// Must be created inside a tokio runtime: the event loop is driven on a
/// spawned task.
pub struct MqttReceiver {
    client: AsyncClient,
    events: ReceiverStream<TransportEvent>,
    state: ConnectionState,
    pump: JoinHandle<()>,
}

impl MqttReceiver {
    pub fn new(client_id: &str, host: &str, port: u16, keep_alive: Duration) -> Self {
        let options = mqtt_options(client_id, host, port, keep_alive);
        let (client, eventloop) = AsyncClient::new(options, 10);

        Self::from_client(client, eventloop)
    }

    pub fn from_client(client: AsyncClient, eventloop: EventLoop) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let state = ConnectionState::default();
        let pump = spawn_event_pump(eventloop, state.clone(), tx);

        Self {
            client,
            events: ReceiverStream::new(rx),
            state,
            pump,
        }
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.clone()
    }

    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        self.state.wait_for_connection(timeout).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        info!("Subscribed to topic: {}", topic);
        Ok(())
    }

    /// Disconnect and give the event loop up to `timeout` to flush queued
    /// requests and the disconnect before it is stopped. Pending events are
    /// dropped.
    pub async fn close(self, timeout: Duration) -> Result<()> {
        let Self {
            client,
            events,
            mut pump,
            ..
        } = self;

        let requested = client.disconnect().await;
        let stopped = tokio::time::timeout(timeout, &mut pump).await.is_ok();
        if !stopped {
            warn!("Event loop did not stop within {:?}", timeout);
            pump.abort();
        }
        drop(events);

        match requested {
            // An earlier disconnect already stopped the event loop.
            Err(_) if stopped => Ok(()),
            other => other.map_err(Into::into),
        }
    }
}

impl Stream for MqttReceiver {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
