//! imagine CLI - trigger generations, run analyses and split composites from the shell.
//!
//! Configuration comes from the environment (a `.env` file in the working directory is loaded
//! first). Set `USE_AI_MOCKS=true` to run without any external service.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use imagine_pipeline::decompose::{AssetFetcher as _, HttpAssetFetcher, split_grid};
use imagine_pipeline::vendors::gemini::{DEFAULT_MODEL_ID, GEMINI_MODELS};
use imagine_pipeline::{
    GenerationOrchestrator, GenerationOutcome, JournalOutcome, JsonLinesConnector, PipelineConfig,
    PipelineError, init_observability,
};
use tracing::debug;

#[derive(Parser)]
#[command(name = "imagine")]
#[command(about = "Asynchronous image-generation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a composite for a prompt, split it and store the tiles
    Generate {
        /// Prompt sent to the generation service
        #[arg(long)]
        prompt: String,

        #[command(flatten)]
        stream: StreamArgs,
    },
    /// Analyse text, then generate images for the prompt the analysis produced
    Journal {
        /// Text to analyse
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// File containing the text to analyse
        #[arg(long)]
        file: Option<PathBuf>,

        /// Analysis model override (see `imagine models`)
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        stream: StreamArgs,
    },
    /// Split one composite into four JPEG tiles
    Split {
        /// URL of the composite image
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        url: Option<String>,

        /// Local composite image
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory for `0.jpg` .. `3.jpg`
        #[arg(long)]
        out: PathBuf,
    },
    /// List the known analysis models
    Models,
}

#[derive(Args)]
struct StreamArgs {
    /// JSON-lines file of notification-stream records
    #[arg(long, env = "IMAGINE_EVENTS", default_value = "events.jsonl")]
    events: PathBuf,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        match e.downcast_ref::<PipelineError>() {
            Some(err) => eprintln!("Error: {}: {err}", err.summary()),
            None => eprintln!("Error: {e}"),
        }
        process::exit(1);
    }
}

async fn run(command: Command) -> CliResult {
    match command {
        Command::Generate { prompt, stream } => {
            let orchestrator = orchestrator(&stream)?;
            let result = orchestrator.generate(&prompt).await;
            orchestrator.shutdown();
            print_json(&generation_json(&result?))
        }
        Command::Journal {
            text,
            file,
            model,
            stream,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
                (None, None) => return Err("either --text or --file is required".into()),
            };
            let orchestrator = orchestrator(&stream)?;
            let result = orchestrator.journal(&text, model.as_deref()).await;
            orchestrator.shutdown();
            print_json(&journal_json(&result?))
        }
        Command::Split { url, input, out } => {
            let bytes = match (url, input) {
                (Some(url), _) => HttpAssetFetcher::with_default_timeout()?
                    .fetch(&url)
                    .await?
                    .to_vec(),
                (None, Some(path)) => tokio::fs::read(&path).await?,
                (None, None) => return Err("either --url or --input is required".into()),
            };
            let tiles = tokio::task::spawn_blocking(move || split_grid(&bytes, 90)).await??;
            tokio::fs::create_dir_all(&out).await?;
            for tile in &tiles {
                let path = out.join(format!("{}.{}", tile.index, tile.extension()));
                tokio::fs::write(&path, &tile.bytes).await?;
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Models => {
            for model in GEMINI_MODELS {
                let marker = if model.id == DEFAULT_MODEL_ID { "*" } else { " " };
                println!(
                    "{marker} {:<22} {:<18} {}",
                    model.id, model.display_name, model.description
                );
            }
            Ok(())
        }
    }
}

fn orchestrator(stream: &StreamArgs) -> Result<GenerationOrchestrator, PipelineError> {
    let config = PipelineConfig::from_env()?;
    debug!(mock = config.mock_mode, events = %stream.events.display(), "building pipeline");
    let connector = Arc::new(JsonLinesConnector::new(&stream.events));
    Ok(GenerationOrchestrator::from_config(&config, connector)?)
}

fn generation_json(outcome: &GenerationOutcome) -> serde_json::Value {
    serde_json::json!({
        "request_id": outcome.request_id,
        "correlation_token": outcome.correlation_token,
        "image_urls": outcome.image_urls,
        "paths": outcome.paths,
        "upload_error": outcome.upload_error,
    })
}

fn journal_json(outcome: &JournalOutcome) -> serde_json::Value {
    let generation = match &outcome.generation {
        Some(Ok(generation)) => generation_json(generation),
        Some(Err(err)) => serde_json::json!({
            "error": err.summary(),
            "phase": err.phase(),
            "detail": err.to_string(),
        }),
        None => serde_json::Value::Null,
    };
    serde_json::json!({
        "analysis_text": outcome.analysis_text,
        "image_prompt": outcome.image_prompt,
        "generation": generation,
    })
}

fn print_json(value: &serde_json::Value) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
