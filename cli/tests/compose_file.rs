use cli::compose::{ComposeOptions, InferenceOptions, write_compose};
use serde_yaml::Value;
use std::fs;

#[test]
fn test_inference_fleet_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("docker-compose.yml");
    let options = ComposeOptions {
        devices: 120,
        mqtt_enabled: true,
        inference: Some(InferenceOptions {
            devices: Some(vec![1, 60, 120]),
            ..InferenceOptions::default()
        }),
    };

    write_compose(&options, &output).unwrap();
    let written = fs::read_to_string(&output).unwrap();

    assert!(written.contains("# To regenerate: edge-sim generate-compose --devices 120 --llm-enabled"));
    assert!(written.contains("--llm-devices 1,60,120\n"));

    let compose: Value = serde_yaml::from_str(&written).unwrap();
    let services = compose["services"].as_mapping().unwrap();

    // 120 devices, broker, image builder, model server.
    assert_eq!(services.len(), 123);
    assert!(services.contains_key("llm-server"));
    assert!(compose["volumes"]["llm_models"].is_mapping());

    let with_llm = services
        .values()
        .filter(|service| {
            service["environment"]
                .as_sequence()
                .is_some_and(|env| env.contains(&Value::from("LLM_ENABLED=true")))
        })
        .count();
    assert_eq!(with_llm, 3);

    let device = &compose["services"]["edge-device-060"];
    assert_eq!(
        device["volumes"][2],
        Value::from("./metrics/edge-device-060:/app/metrics")
    );
}
