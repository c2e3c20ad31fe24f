use std::time::Duration;

use mqtt_client::{MqttReceiver, MqttSender, Publisher};

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    println!("Publishing to broker localhost:1883 at topic iot/telemetry/example");
    let (sender, eventloop) =
        MqttSender::new("example-sender", "127.0.0.1", 1883, Duration::from_secs(30));
    let receiver = MqttReceiver::from_client(sender.client(), eventloop);

    receiver
        .wait_for_connection(Duration::from_secs(10))
        .await
        .expect("Error connecting to mqtt. Is the broker on?");

    for i in 0..7 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let payload = format!(
            r#"{{"data":{{"co":0.0045,"humidity":51.0,"light":false,"lpg":0.0076,"motion":false,"smoke":0.0234,"temp":{}.0}},"device_id":"example","ts":1594512000.0}}"#,
            70 + i
        );
        sender
            .publish("iot/telemetry/example", &payload)
            .await
            .expect("Error sending message. Is the broker on?");
    }

    sender.disconnect().await.ok();
}
