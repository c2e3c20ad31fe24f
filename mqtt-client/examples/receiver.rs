use std::time::Duration;

use mqtt_client::{MqttReceiver, TransportEvent};
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    println!("Listening on broker localhost:1883, topic iot/telemetry/+");
    println!("Publish 'close' to stop the receiver");
    let mut receiver = MqttReceiver::new("example-receiver", "127.0.0.1", 1883, Duration::from_secs(30));

    while let Some(event) = receiver.next().await {
        match event {
            TransportEvent::Connected => {
                let _ = receiver.subscribe("iot/telemetry/+").await;
            }
            TransportEvent::Disconnected(reason) => println!("Disconnected: {}", reason),
            TransportEvent::MessageReceived { topic, payload, .. } => {
                let text = String::from_utf8_lossy(&payload);
                println!("[{}] {}", topic, text);
                if text == "close" {
                    break;
                }
            }
        }
    }

    if let Err(e) = receiver.close(Duration::from_secs(1)).await {
        println!("Error closing receiver: {}", e);
    }
    println!("Receiver closed")
}
