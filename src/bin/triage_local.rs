//! Run the triage workflow over photos on disk.
//!
//! ```bash
//! VISION_API_KEY=sk-... cargo run --bin triage-local -- --job-type general_maintenance a.jpg b.jpg
//! ```
//!
//! Progress events are printed to stdout as JSON lines; logs go to stderr.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use photo_triage::app_state::{self, AppState};
use photo_triage::config::standards::Standards;
use photo_triage::config::AppConfig;
use photo_triage::models::image::ImageInput;
use photo_triage::models::workflow::JobType;
use photo_triage::services::events;
use photo_triage::services::quality::QualityAnalyzer;

#[derive(Parser, Debug)]
#[command(name = "triage-local")]
#[command(about = "Score, categorize and review a batch of field photos")]
struct Args {
    /// Photos to triage, in batch order
    #[arg(required = true)]
    photos: Vec<PathBuf>,

    /// Job template to check coverage against
    #[arg(short, long)]
    job_type: Option<JobType>,

    /// Free-text job description passed to the classifier
    #[arg(short = 'c', long)]
    job_context: Option<String>,

    /// Attempt budget (1-5)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=5))]
    max_attempts: Option<u32>,

    /// Analyze once and never retake
    #[arg(long)]
    no_retry: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::from_env()?;
    let standards = Standards::load(config.standards_dir.as_deref())?;
    let model = app_state::vision_model_from_config(&config)?;
    let capacity = config.event_channel_capacity;
    let state = AppState::new(config, standards, Arc::new(QualityAnalyzer), model);

    let images = args.photos.into_iter().map(ImageInput::from_path).collect();
    let request = state.batch_request(
        images,
        args.job_context,
        args.job_type,
        !args.no_retry,
        args.max_attempts,
    );

    let (publisher, mut subscription) = events::channel(Uuid::new_v4(), capacity);
    let engine = state.engine.clone();
    let run = tokio::spawn(async move { engine.run(request, publisher).await });

    while let Some(event) = subscription.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    let result = run.await??;
    if !result.success {
        std::process::exit(2);
    }
    Ok(())
}
