use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use honeymeter::{
    CapturedExchange, ExchangeProcessor,
    budget::{Decision, SpendLedger},
    settings::Settings,
    telemetry,
};
use log::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "honeymeter", about = "LLM call metering and budget enforcement")]
struct Opt {
    /// Verbose output
    #[clap(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the active provider registry
    Providers,
    /// Run a captured exchange (JSON file) through the pipeline and print the report
    Inspect {
        path: String,
        /// Identity the call is charged to
        #[clap(long, env = "HONEYMETER_IDENTITY", default_value = "anonymous")]
        identity: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if opt.verbose { "info" } else { "warn" },
    ))
    .init();

    let settings = Settings::new().context("Failed to load settings")?;

    if let Err(e) = telemetry::init_metrics(settings.otel_exporter_otlp_endpoint.as_deref()) {
        warn!("Failed to initialize OpenTelemetry metrics: {:#}", e);
    }

    let store = Arc::new(SpendLedger::new());
    let processor = ExchangeProcessor::from_settings(&settings, store)
        .context("Failed to build provider registry")?;

    let result = match opt.command {
        Command::Providers => {
            print_providers(&processor);
            Ok(())
        }
        Command::Inspect { path, identity } => inspect(&processor, &path, &identity),
    };

    telemetry::shutdown_metrics();
    result
}

fn print_providers(processor: &ExchangeProcessor) {
    for provider in processor.registry().providers() {
        println!(
            "{} [{}] (default tier: {})",
            provider.slug(),
            provider.hosts().join(", "),
            provider.default_tier()
        );
        for handler in provider.handlers() {
            let endpoints: Vec<String> = handler.endpoints().iter().map(|e| e.to_string()).collect();
            println!(
                "  {:<14} {:<10} {}{}",
                handler.name(),
                handler.capability(),
                endpoints.join(" "),
                if handler.supports_streaming() { " (stream)" } else { "" }
            );
        }
    }
}

fn inspect(processor: &ExchangeProcessor, path: &str, identity: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let exchange: CapturedExchange =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse exchange in {}", path))?;

    let model = exchange
        .request
        .get("model")
        .and_then(|m| m.as_str())
        .map(str::to_string);
    match processor
        .admit(identity, &exchange.host, model.as_deref())
        .context("Budget check failed")?
    {
        Decision::Allow => info!("Call by {} admitted", identity),
        Decision::Deny(denial) => warn!("Call by {} would be refused: {}", identity, denial),
    }

    let report = processor.process(identity, &exchange);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}
