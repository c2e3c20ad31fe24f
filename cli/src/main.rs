use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cli::{
    analyze::MetricsAnalyzer,
    compose::{self, CONFIRM_ABOVE, ComposeOptions, InferenceOptions},
};
use log::{error, info, warn};
use std::{io, path::PathBuf};

/// Edge device simulation tooling
#[derive(Parser, Debug)]
#[command(version, about = "Edge device simulation tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a docker compose file for a fleet of simulated devices
    #[command(name = "generate-compose")]
    GenerateCompose(GenerateArgs),

    /// Summarize and compare the inference metrics written by devices
    #[command(name = "analyze-metrics")]
    AnalyzeMetrics(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Number of edge devices to create
    #[arg(long, default_value_t = 5)]
    devices: usize,

    /// Output file name
    #[arg(long, default_value = "docker-compose.yml")]
    output: PathBuf,

    /// Disable MQTT telemetry (plain device containers)
    #[arg(long)]
    no_mqtt: bool,

    /// Run LLM inference on the devices
    #[arg(long)]
    llm_enabled: bool,

    /// Model served to the devices
    #[arg(long, default_value = "microsoft/Phi-3.5-mini-instruct")]
    llm_model: String,

    /// Device numbers (1-based, comma separated) running inference; all when omitted
    #[arg(long, value_delimiter = ',')]
    llm_devices: Option<Vec<usize>>,

    /// Run inference every N messages
    #[arg(long, default_value_t = 5)]
    llm_interval: u64,

    /// Maximum number of generated tokens
    #[arg(long, default_value_t = 512)]
    llm_max_length: u32,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.7)]
    llm_temperature: f32,

    /// Do not ask for confirmation on very large fleets
    #[arg(long, short)]
    yes: bool,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Directory containing metrics JSON files
    #[arg(long, default_value = "metrics")]
    metrics_dir: PathBuf,

    /// Analyze metrics for one device directory only
    #[arg(long)]
    device: Option<String>,

    /// Compare metrics across all models
    #[arg(long)]
    compare: bool,

    /// Export metrics to a CSV file
    #[arg(long)]
    export_csv: Option<PathBuf>,
}

impl GenerateArgs {
    fn options(&self) -> ComposeOptions {
        ComposeOptions {
            devices: self.devices,
            mqtt_enabled: !self.no_mqtt,
            inference: self.llm_enabled.then(|| InferenceOptions {
                model_name: self.llm_model.clone(),
                devices: self.llm_devices.clone(),
                interval: self.llm_interval,
                max_length: self.llm_max_length,
                temperature: self.llm_temperature,
            }),
        }
    }
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let options = args.options();
    options.validate()?;

    if options.devices > CONFIRM_ABOVE && !args.yes {
        warn!(
            "Creating {} devices may consume significant resources",
            options.devices
        );
        let confirmed = compose::confirm(options.devices, &mut io::stdin().lock(), &mut io::stdout())?;
        if !confirmed {
            info!("Cancelled by user");
            return Ok(());
        }
    }

    info!(
        "Generating docker compose configuration for {} devices",
        options.devices
    );
    compose::write_compose(&options, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!("Generated {}", args.output.display());

    println!("\nNext steps:");
    println!("   1. Review the generated {}", args.output.display());
    if options.mqtt_enabled {
        println!("   2. Ensure config/mosquitto.conf exists for the MQTT broker");
        println!("   3. Run: docker compose up --build");
        println!("   4. Monitor telemetry: telemetry-consumer");
        println!("\nMQTT topics: iot/telemetry/+");
        println!("MQTT broker: localhost:1883");
    } else {
        println!("   2. Run: docker compose up --build");
    }
    if let Some(inference) = &options.inference {
        println!(
            "\nLLM inference: {} every {} messages, metrics under ./metrics/",
            inference.model_name, inference.interval
        );
    }

    Ok(())
}

fn analyze(args: AnalyzeArgs) -> anyhow::Result<()> {
    info!("Loading metrics from: {}", args.metrics_dir.display());
    let analyzer = MetricsAnalyzer::load(&args.metrics_dir, args.device.as_deref())?;

    if analyzer.is_empty() {
        error!("No metrics data found");
        return Ok(());
    }

    let mut stdout = io::stdout().lock();
    analyzer.print_summary(&mut stdout)?;

    if args.compare {
        analyzer.compare(&mut stdout)?;
    }

    if let Some(output) = &args.export_csv {
        analyzer
            .export_csv(output)
            .with_context(|| format!("exporting {}", output.display()))?;
        println!("\nMetrics exported to: {}", output.display());
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::GenerateCompose(args) => generate(args),
        Commands::AnalyzeMetrics(args) => analyze(args),
    }
}
