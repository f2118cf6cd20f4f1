use std::process::ExitCode;

use clap::Parser;
use indicatif::MultiProgress;
use log::{error, info};

use audio_harvest::analyzer::AudioAnalyzer;
use audio_harvest::cli::{parse_error_exit_code, Cli};
use audio_harvest::config::Config;
use audio_harvest::downloader::Downloader;
use audio_harvest::extractor::LinkExtractor;
use audio_harvest::logger;
use audio_harvest::pipeline::{Pipeline, EXIT_FATAL};
use audio_harvest::storage::GcsObjectStore;
use audio_harvest::store::SqlMetadataStore;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_error_exit_code(&e));
        }
    };

    let progress = MultiProgress::new();
    if let Err(e) = logger::init(cli.log_level_filter(), progress.clone()) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match run(config, progress).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(
    config: Config,
    progress: MultiProgress,
) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .user_agent(concat!("audio-harvest/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let metadata = SqlMetadataStore::connect(&config.database_url, config.table.clone()).await?;
    // Owns the parsed service account key until the run ends.
    let object_store = GcsObjectStore::from_config(client.clone(), &config)?;

    let pipeline = Pipeline::new(
        LinkExtractor::new(client.clone(), config.extensions.clone()),
        Downloader::new(client, config.scratch_dir.clone()).with_unique_names(config.workers > 1),
        AudioAnalyzer::new(config.thresholds),
        object_store,
        metadata,
    )
    .with_workers(config.workers)
    .with_progress(config.show_progress.then_some(progress));

    let report = pipeline.run(&config.source_url).await?;

    match pipeline.metadata().count().await {
        Ok(count) => info!("{} records are in {}", count, config.table.table),
        Err(e) => error!("Failed to count records: {}", e),
    }

    Ok(report.exit_code())
}
