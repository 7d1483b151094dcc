use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use tender_docgen::engine::EngineManager;
use tender_docgen::service::load_registry;
use tender_docgen::{init_logging, DocgenConfig, DocumentService, GenerationRequest};

#[derive(Parser)]
#[command(name = "tender-docgen", version, about = "Generate tender instrument PDFs from templates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every sub-template of a category and store the PDFs.
    Generate {
        #[arg(long)]
        category: String,
        /// JSON file with the template payload.
        #[arg(long)]
        payload: PathBuf,
        #[arg(long)]
        instrument_id: Option<i64>,
        #[arg(long)]
        variant: Option<String>,
    },
    /// List configured document categories.
    Categories,
    /// Start the rendering engine once and report the outcome.
    CheckEngine,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = DocgenConfig::from_env()?;

    match cli.command {
        Command::Generate {
            category,
            payload,
            instrument_id,
            variant,
        } => {
            let service = DocumentService::start(&config)
                .await
                .context("failed to start document service")?;
            let outcome = generate(&service, category, &payload, instrument_id, variant).await;
            service.shutdown().await;
            outcome
        }
        Command::Categories => {
            let registry = load_registry(&config).context("failed to load template registry")?;
            for config in registry.categories() {
                println!(
                    "{:<24} {} -> {} [{}]",
                    config.category,
                    config.template_dir,
                    config.storage_subpath,
                    config.sub_templates.join(", ")
                );
            }
            Ok(())
        }
        Command::CheckEngine => {
            let service =
                DocumentService::with_chrome(&config).context("failed to build document service")?;
            let outcome = check_engine(service.engine()).await;
            service.shutdown().await;
            outcome
        }
    }
}

async fn generate(
    service: &DocumentService,
    category: String,
    payload: &Path,
    instrument_id: Option<i64>,
    variant: Option<String>,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(payload)
        .await
        .with_context(|| format!("failed to read payload {}", payload.display()))?;
    let payload: serde_json::Value =
        serde_json::from_str(&raw).context("payload is not valid JSON")?;

    let mut request = GenerationRequest::new(category, payload);
    request.instrument_id = instrument_id;
    request.instrument_variant = variant;

    let result = service.generate(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.is_partial() {
        log::warn!("{} sub-template(s) failed", result.failures.len());
    }
    Ok(())
}

async fn check_engine(engine: &EngineManager) -> anyhow::Result<()> {
    match engine.ensure_ready().await {
        Ok(_) => {
            println!("engine: {:?}", engine.state());
            Ok(())
        }
        Err(unavailable) => {
            println!("{}", serde_json::to_string_pretty(&unavailable)?);
            Err(unavailable.into())
        }
    }
}
