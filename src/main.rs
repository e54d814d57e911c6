use clap::Parser;
use medroute::agents::Orchestrator;
use medroute::config::Config;
use medroute::llm::provider::LLM;
use medroute::payload::Payload;
use medroute::tools::prediction::HttpPredictionClient;
use medroute::tools::report::HttpReportClient;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run one patient assessment through the agent pipeline.
#[derive(Parser, Debug)]
#[command(name = "medroute", version, about)]
struct Args {
    /// Path to a payload JSON document (field name -> value). Reads stdin
    /// when omitted.
    payload: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medroute=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        "Configuration loaded"
    );

    // Build the injected clients
    let chat = Arc::new(LLM::from_config(&config.llm)?);
    let predictions = Arc::new(HttpPredictionClient::new(
        &config.services.prediction_base_url,
        config.services.timeout_secs,
    )?);
    let reports = Arc::new(HttpReportClient::new(
        &config.services.report_base_url,
        config.services.timeout_secs,
    )?);

    let orchestrator = Orchestrator::new(chat, predictions, reports, &config);

    // Read the payload
    let raw = match &args.payload {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let payload: Payload = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid payload JSON: {}", e))?;

    // Run the assessment and print the outcome
    let outcome = orchestrator.assess(payload).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
