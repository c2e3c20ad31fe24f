use crate::error::{Result, TransportError};
use log::{debug, info, warn};
use rumqttc::{
    ConnectReturnCode, Event, EventLoop,
    Event::{Incoming, Outgoing},
    Outgoing as OutgoingPacket, Packet,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// What the connection reports to the rest of the program.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected(String),
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
    },
}

/// Shared "connected" flag, written by the event pump and read by whoever
/// needs to know whether the broker is reachable. Staleness of one poll is
/// acceptable.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState(Arc<AtomicBool>);

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }

    /// Poll the flag once per `POLL_INTERVAL` until it is set or `timeout`
    /// elapses.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        let mut waited = Duration::ZERO;

        while !self.is_connected() {
            if waited >= timeout {
                return Err(TransportError::ConnectTimeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;
        }

        Ok(())
    }
}

/// Map a raw `rumqttc` notification to a [`TransportEvent`], ignoring the
/// protocol chatter (pings, acks, outgoing packets).
pub fn translate(event: &Event) -> Option<TransportEvent> {
    match event {
        Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                Some(TransportEvent::Connected)
            } else {
                Some(TransportEvent::Disconnected(format!(
                    "connection refused: {:?}",
                    ack.code
                )))
            }
        }
        Incoming(Packet::Publish(msg)) => Some(TransportEvent::MessageReceived {
            topic: msg.topic.clone(),
            payload: msg.payload.to_vec(),
            qos: msg.qos as u8,
        }),
        Incoming(Packet::Disconnect) => {
            Some(TransportEvent::Disconnected("broker closed the session".to_string()))
        }
        Incoming(_) | Outgoing(_) => None,
    }
}

/// Drive `eventloop` on a background task until the client disconnects or
/// the event channel is dropped.
///
/// Connection errors are reported once as [`TransportEvent::Disconnected`]
/// while the pump keeps polling, which makes `rumqttc` reconnect.
pub fn spawn_event_pump(
    mut eventloop: EventLoop,
    state: ConnectionState,
    events: mpsc::Sender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Outgoing(OutgoingPacket::Disconnect)) => {
                    debug!("Client requested disconnect, stopping event pump");
                    state.set(false);
                    break;
                }
                Ok(event) => {
                    let Some(event) = translate(&event) else {
                        continue;
                    };

                    match &event {
                        TransportEvent::Connected => {
                            info!("Connected to MQTT broker successfully");
                            state.set(true);
                        }
                        TransportEvent::Disconnected(reason) => {
                            warn!("Disconnected from MQTT broker: {}", reason);
                            state.set(false);
                        }
                        TransportEvent::MessageReceived { topic, .. } => {
                            debug!("Message received on {}", topic);
                        }
                    }

                    if events.send(event).await.is_err() {
                        debug!("Event receiver dropped, stopping event pump");
                        break;
                    }
                }
                Err(e) => {
                    let was_connected = state.is_connected();
                    state.set(false);

                    if was_connected {
                        warn!("Connection to MQTT broker lost: {}", e);
                        let event = TransportEvent::Disconnected(e.to_string());
                        if events.send(event).await.is_err() {
                            break;
                        }
                    } else {
                        debug!("MQTT connection error: {}", e);
                    }

                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, QoS};

    #[test]
    fn test_translate_connack() {
        let ok = Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        assert_eq!(translate(&ok), Some(TransportEvent::Connected));

        let refused = Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert!(matches!(
            translate(&refused),
            Some(TransportEvent::Disconnected(_))
        ));
    }

    #[test]
    fn test_translate_publish() {
        let publish = Publish::new("iot/telemetry/abc", QoS::AtLeastOnce, "{}");
        let event = translate(&Incoming(Packet::Publish(publish)));

        assert_eq!(
            event,
            Some(TransportEvent::MessageReceived {
                topic: "iot/telemetry/abc".to_string(),
                payload: b"{}".to_vec(),
                qos: 1,
            })
        );
    }

    #[test]
    fn test_translate_ignores_chatter() {
        assert_eq!(translate(&Incoming(Packet::PingResp)), None);
        assert_eq!(translate(&Outgoing(OutgoingPacket::PingReq)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_connection_succeeds() {
        let state = ConnectionState::default();
        let writer = state.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            writer.set(true);
        });

        state
            .wait_for_connection(Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_connection_times_out() {
        let state = ConnectionState::default();
        let start = tokio::time::Instant::now();

        let result = state.wait_for_connection(Duration::from_secs(10)).await;

        assert!(matches!(result, Err(TransportError::ConnectTimeout(_))));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }
}
