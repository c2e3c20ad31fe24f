use crate::error::{CliError, Result};
use serde::{Serialize, Serializer, ser::SerializeMap};
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    io::{self, BufRead, Write},
    path::Path,
};

/// Device ids found in the telemetry dataset.
pub const DATASET_DEVICE_IDS: [&str; 3] = [
    "00:0f:00:70:91:0a",
    "1c:bf:ce:15:ec:4d",
    "b8:27:eb:bf:9d:51",
];

/// Above this many devices the user is asked before anything is written.
pub const CONFIRM_ABOVE: usize = 10_000;

const NETWORK: &str = "edge-network";
const BROKER: &str = "mqtt-broker";
const IMAGE_BUILDER: &str = "iot-device-image";
const DEVICE_IMAGE: &str = "iot-device-simulator:latest";
const LLM_SERVER: &str = "llm-server";
const LLM_IMAGE: &str = "ghcr.io/huggingface/text-generation-inference:latest";

/// Dataset device id for the `index`-th device (0-based), cycling through
/// [`DATASET_DEVICE_IDS`].
pub fn get_device_id(index: usize) -> &'static str {
    DATASET_DEVICE_IDS[index % DATASET_DEVICE_IDS.len()]
}

/// Device number `n` padded to the width used for a fleet of `total`.
pub fn device_number(n: usize, total: usize) -> String {
    match total {
        0..100 => format!("{:02}", n),
        100..1000 => format!("{:03}", n),
        _ => format!("{:04}", n),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    pub model_name: String,
    /// 1-based device numbers running inference; `None` means all.
    pub devices: Option<Vec<usize>>,
    pub interval: u64,
    pub max_length: u32,
    pub temperature: f32,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            model_name: "microsoft/Phi-3.5-mini-instruct".to_string(),
            devices: None,
            interval: 5,
            max_length: 512,
            temperature: 0.7,
        }
    }
}

impl InferenceOptions {
    fn includes(&self, n: usize) -> bool {
        self.devices
            .as_ref()
            .is_none_or(|devices| devices.contains(&n))
    }

    fn device_count(&self, total: usize) -> usize {
        (1..=total).filter(|n| self.includes(*n)).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOptions {
    pub devices: usize,
    pub mqtt_enabled: bool,
    pub inference: Option<InferenceOptions>,
}

impl ComposeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.devices < 1 {
            return Err(CliError::InvalidDeviceCount(self.devices));
        }

        if let Some(inference) = &self.inference {
            if !self.mqtt_enabled {
                return Err(CliError::InferenceRequiresMqtt);
            }
            for &index in inference.devices.iter().flatten() {
                if index < 1 || index > self.devices {
                    return Err(CliError::InvalidInferenceDevice {
                        index,
                        devices: self.devices,
                    });
                }
            }
        }

        Ok(())
    }

    /// Command line that produces the same descriptor.
    pub fn command_line(&self) -> String {
        let mut cmd = format!("edge-sim generate-compose --devices {}", self.devices);
        if !self.mqtt_enabled {
            cmd.push_str(" --no-mqtt");
        }
        if let Some(inference) = &self.inference {
            let _ = write!(cmd, " --llm-enabled --llm-model {}", inference.model_name);
            if let Some(devices) = &inference.devices {
                let list: Vec<String> = devices.iter().map(ToString::to_string).collect();
                let _ = write!(cmd, " --llm-devices {}", list.join(","));
            }

            let defaults = InferenceOptions::default();
            if inference.interval != defaults.interval {
                let _ = write!(cmd, " --llm-interval {}", inference.interval);
            }
            if inference.max_length != defaults.max_length {
                let _ = write!(cmd, " --llm-max-length {}", inference.max_length);
            }
            if inference.temperature != defaults.temperature {
                let _ = write!(cmd, " --llm-temperature {}", inference.temperature);
            }
        }
        cmd
    }
}

/// Services keyed by name, serialized in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ServiceMap(Vec<(String, Service)>);

impl ServiceMap {
    pub fn insert(&mut self, name: impl Into<String>, service: Service) {
        self.0.push((name.into(), service));
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ServiceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, service) in &self.0 {
            map.serialize_entry(name, service)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Build {
    pub context: String,
    pub dockerfile: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Volume {
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    pub driver: String,
    pub ipam: Ipam,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ipam {
    pub config: Vec<Subnet>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnet {
    pub subnet: String,
}

/// A docker compose document.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeFile {
    pub services: ServiceMap,
    pub volumes: BTreeMap<String, Volume>,
    pub networks: BTreeMap<String, Network>,
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn local_volume() -> Volume {
    Volume {
        driver: "local".to_string(),
    }
}

fn edge_network() -> Network {
    Network {
        driver: "bridge".to_string(),
        ipam: Ipam {
            config: vec![Subnet {
                subnet: "172.20.0.0/16".to_string(),
            }],
        },
    }
}

fn broker_service() -> Service {
    Service {
        image: Some("eclipse-mosquitto:1.6".to_string()),
        container_name: Some(BROKER.to_string()),
        hostname: Some(BROKER.to_string()),
        ports: strings(["1883:1883", "9001:9001"]),
        volumes: strings([
            "./config/mosquitto.conf:/mosquitto/config/mosquitto.conf:ro",
            "mosquitto_data:/mosquitto/data",
            "mosquitto_logs:/mosquitto/log",
        ]),
        networks: strings([NETWORK]),
        restart: Some("unless-stopped".to_string()),
        ..Service::default()
    }
}

fn image_builder_service() -> Service {
    Service {
        build: Some(Build {
            context: ".".to_string(),
            dockerfile: "Dockerfile".to_string(),
            args: BTreeMap::from([("BUILDKIT_INLINE_CACHE".to_string(), "1".to_string())]),
        }),
        image: Some(DEVICE_IMAGE.to_string()),
        command: strings([
            "echo",
            "This service builds the shared image for edge device simulation",
        ]),
        ..Service::default()
    }
}

fn llm_service(model_name: &str) -> Service {
    Service {
        image: Some(LLM_IMAGE.to_string()),
        container_name: Some(LLM_SERVER.to_string()),
        hostname: Some(LLM_SERVER.to_string()),
        volumes: strings(["llm_models:/data"]),
        networks: strings([NETWORK]),
        command: vec!["--model-id".to_string(), model_name.to_string()],
        restart: Some("unless-stopped".to_string()),
        ..Service::default()
    }
}

fn device_service(n: usize, options: &ComposeOptions) -> (String, Service) {
    let number = device_number(n, options.devices);
    let name = format!("edge-device-{}", number);
    let data_volumes = strings(["./config:/etc/edge-device:ro", "./dataset:/app/dataset:ro"]);

    if !options.mqtt_enabled {
        let service = Service {
            build: Some(Build {
                context: ".".to_string(),
                dockerfile: "Dockerfile".to_string(),
                args: BTreeMap::new(),
            }),
            container_name: Some(name.clone()),
            hostname: Some(name.clone()),
            environment: vec![format!("DEVICE_NAME={}", name), format!("DEVICE_ID={}", number)],
            volumes: data_volumes,
            networks: strings([NETWORK]),
            restart: Some("unless-stopped".to_string()),
            ..Service::default()
        };
        return (name, service);
    }

    let mut service = Service {
        image: Some(DEVICE_IMAGE.to_string()),
        container_name: Some(name.clone()),
        hostname: Some(name.clone()),
        environment: vec![
            format!("DEVICE_NAME={}", name),
            format!("DEVICE_ID={}", get_device_id(n - 1)),
            format!("MQTT_BROKER={}", BROKER),
            "MQTT_PORT=1883".to_string(),
        ],
        volumes: data_volumes,
        networks: strings([NETWORK]),
        depends_on: strings([BROKER, IMAGE_BUILDER]),
        restart: Some("unless-stopped".to_string()),
        ..Service::default()
    };

    if let Some(inference) = options.inference.as_ref().filter(|i| i.includes(n)) {
        service.environment.extend([
            "LLM_ENABLED=true".to_string(),
            format!("LLM_MODEL_NAME={}", inference.model_name),
            format!("LLM_ENDPOINT=http://{}:80", LLM_SERVER),
            format!("LLM_INFERENCE_INTERVAL={}", inference.interval),
            format!("LLM_MAX_LENGTH={}", inference.max_length),
            format!("LLM_TEMPERATURE={}", inference.temperature),
            "METRICS_DIR=/app/metrics".to_string(),
        ]);
        service.volumes.push(format!("./metrics/{}:/app/metrics", name));
        service.depends_on.push(LLM_SERVER.to_string());
    }

    (name, service)
}

/// Build the descriptor. `options` must have passed
/// [`validate`](ComposeOptions::validate).
pub fn build_compose(options: &ComposeOptions) -> ComposeFile {
    let mut services = ServiceMap::default();
    let mut volumes = BTreeMap::new();

    if options.mqtt_enabled {
        services.insert(BROKER, broker_service());
        services.insert(IMAGE_BUILDER, image_builder_service());
        volumes.insert("mosquitto_data".to_string(), local_volume());
        volumes.insert("mosquitto_logs".to_string(), local_volume());

        if let Some(inference) = &options.inference {
            services.insert(LLM_SERVER, llm_service(&inference.model_name));
            volumes.insert("llm_models".to_string(), local_volume());
        }
    }

    for n in 1..=options.devices {
        let (name, service) = device_service(n, options);
        services.insert(name, service);
    }

    ComposeFile {
        services,
        volumes,
        networks: BTreeMap::from([(NETWORK.to_string(), edge_network())]),
    }
}

/// Comment block written above the YAML document.
pub fn header(options: &ComposeOptions) -> String {
    let mut header = String::new();
    let _ = writeln!(header, "# This file is generated by edge-sim generate-compose");
    let _ = writeln!(header, "# To regenerate: {}", options.command_line());
    let _ = writeln!(header, "# Number of devices: {}", options.devices);
    let _ = writeln!(
        header,
        "# MQTT telemetry: {}",
        if options.mqtt_enabled { "enabled" } else { "disabled" }
    );
    if let Some(inference) = &options.inference {
        let _ = writeln!(
            header,
            "# LLM inference: enabled ({}, {} devices)",
            inference.model_name,
            inference.device_count(options.devices)
        );
    }
    header.push('\n');
    header
}

pub fn render(options: &ComposeOptions) -> Result<String> {
    options.validate()?;

    let yaml = serde_yaml::to_string(&build_compose(options))?;
    Ok(format!("{}{}", header(options), yaml))
}

pub fn write_compose(options: &ComposeOptions, output: &Path) -> Result<()> {
    let document = render(options)?;
    fs::write(output, document)?;
    Ok(())
}

/// Ask before generating very large fleets. Returns `true` if the user
/// answered `yes` or `y`.
pub fn confirm<R: BufRead, W: Write>(devices: usize, input: &mut R, output: &mut W) -> io::Result<bool> {
    write!(
        output,
        "Creating {} devices may consume significant resources. Continue? (yes/no): ",
        devices
    )?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();

    Ok(answer == "yes" || answer == "y")
}
