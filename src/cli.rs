use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};

use crate::config::{Config, PartialConfig, PartialThresholds};
use crate::error::ConfigError;
use crate::pipeline::{EXIT_FATAL, EXIT_OK};

/// Scrape a page for audio links, analyse each file, upload it and record
/// its metadata.
#[derive(Debug, Parser)]
#[command(name = "audio-harvest", version)]
pub struct Cli {
    /// Optional TOML file with default settings
    #[arg(long, env = "AUDIO_HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Page to scrape for audio links
    #[arg(long, env = "SOURCE_URL")]
    pub source_url: Option<String>,

    /// Destination bucket
    #[arg(long, env = "GCS_BUCKET")]
    pub bucket: Option<String>,

    /// Prefix prepended to every object key
    #[arg(long, env = "GCS_KEY_PREFIX")]
    pub key_prefix: Option<String>,

    /// Service account key file
    #[arg(long = "credentials", env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials_path: Option<PathBuf>,

    #[arg(long, env = "STORAGE_EMULATOR_HOST", hide = true)]
    pub storage_emulator_host: Option<String>,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Target table as `[project.]dataset.table`
    #[arg(long = "table", env = "TABLE_ID")]
    pub table_id: Option<String>,

    /// Directory for temporary downloads
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Loudness (dBFS) at or above which a file is High Energy
    #[arg(long = "high-energy-min", env = "HIGH_ENERGY_MIN_DBFS", allow_hyphen_values = true)]
    pub high_energy_min_dbfs: Option<f64>,

    /// Loudness (dBFS) at or above which a file is Medium Energy
    #[arg(long = "medium-energy-min", env = "MEDIUM_ENERGY_MIN_DBFS", allow_hyphen_values = true)]
    pub medium_energy_min_dbfs: Option<f64>,

    /// Loudness reported for silent or empty audio
    #[arg(long = "silence-floor", env = "SILENCE_FLOOR_DBFS", allow_hyphen_values = true)]
    pub silence_floor_dbfs: Option<f64>,

    /// Duration (ms) from which a track counts as long; enables duration
    /// aware classification
    #[arg(long = "long-track-min", env = "LONG_TRACK_MIN_MS")]
    pub long_track_min_ms: Option<i64>,

    /// Comma separated audio extensions to look for
    #[arg(long, env = "AUDIO_EXTENSIONS", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Files processed at the same time
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    #[arg(long = "http-timeout", env = "HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: Option<u64>,

    /// Show a progress bar
    #[arg(
        long = "progress",
        env = "SHOW_PROGRESS",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub show_progress: bool,

    /// error, warn, info, debug or trace
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    /// Flag and environment values as the top configuration layer.
    pub fn overrides(&self) -> PartialConfig {
        PartialConfig {
            source_url: self.source_url.clone(),
            bucket: self.bucket.clone(),
            key_prefix: self.key_prefix.clone(),
            credentials_path: self.credentials_path.clone(),
            storage_emulator_host: self.storage_emulator_host.clone(),
            database_url: self.database_url.clone(),
            table_id: self.table_id.clone(),
            scratch_dir: self.scratch_dir.clone(),
            extensions: self.extensions.clone(),
            workers: self.workers,
            http_timeout_secs: self.http_timeout_secs,
            // an unset switch leaves the file layer in charge
            show_progress: self.show_progress.then_some(true),
            thresholds: PartialThresholds {
                high_energy_min_dbfs: self.high_energy_min_dbfs,
                medium_energy_min_dbfs: self.medium_energy_min_dbfs,
                silence_floor_dbfs: self.silence_floor_dbfs,
                long_track_min_ms: self.long_track_min_ms,
            },
        }
    }

    /// Flags and environment over the config file over built-in defaults.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let file = match &self.config {
            Some(path) => PartialConfig::from_file(path)?,
            None => PartialConfig::default(),
        };
        Config::try_from(self.overrides().or(file))
    }
}

/// Exit status for a command line clap rejected. Help and version output
/// are reported through the same error type but are not failures.
pub fn parse_error_exit_code(error: &clap::Error) -> u8 {
    if error.use_stderr() {
        EXIT_FATAL
    } else {
        EXIT_OK
    }
}
