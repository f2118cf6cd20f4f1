use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://audio-harvest.db?mode=rwc";
pub const DEFAULT_TABLE_ID: &str = "audio_metadata";
pub const DEFAULT_EXTENSIONS: [&str; 5] = ["mp3", "wav", "ogg", "flac", "aac"];
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Loudness thresholds, in dBFS. Each threshold is the inclusive lower bound
/// of its band.
///
/// With `long_track_min_ms` set, classification also looks at duration:
/// short tracks at or above the medium threshold are High Energy, long tracks
/// below it are Low Energy, and everything else is Medium Energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high_energy_min_dbfs: f64,
    pub medium_energy_min_dbfs: f64,
    pub silence_floor_dbfs: f64,
    pub long_track_min_ms: Option<i64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_energy_min_dbfs: -14.0,
            medium_energy_min_dbfs: -20.0,
            silence_floor_dbfs: -96.0,
            long_track_min_ms: None,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            ("high_energy_min_dbfs", self.high_energy_min_dbfs),
            ("medium_energy_min_dbfs", self.medium_energy_min_dbfs),
            ("silence_floor_dbfs", self.silence_floor_dbfs),
        ];
        for (key, value) in values {
            if !value.is_finite() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{} is not a finite number", value),
                });
            }
        }
        if self.high_energy_min_dbfs < self.medium_energy_min_dbfs {
            return Err(ConfigError::Invalid {
                key: "high_energy_min_dbfs",
                reason: format!(
                    "{} is below the medium threshold {}",
                    self.high_energy_min_dbfs, self.medium_energy_min_dbfs
                ),
            });
        }
        if self.silence_floor_dbfs > self.medium_energy_min_dbfs {
            return Err(ConfigError::Invalid {
                key: "silence_floor_dbfs",
                reason: format!(
                    "{} is above the medium threshold {}",
                    self.silence_floor_dbfs, self.medium_energy_min_dbfs
                ),
            });
        }
        if let Some(ms) = self.long_track_min_ms {
            if ms <= 0 {
                return Err(ConfigError::Invalid {
                    key: "long_track_min_ms",
                    reason: format!("{} is not a positive duration", ms),
                });
            }
        }
        Ok(())
    }
}

/// Target table, written as `[project.]dataset.table` or just `table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn parse(id: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = id.trim().split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::Invalid {
                key: "table_id",
                reason: format!("`{}` has an empty segment", id),
            });
        }
        let owned = |s: &str| s.to_string();
        match parts.as_slice() {
            [table] => Ok(Self { project: None, dataset: None, table: owned(table) }),
            [dataset, table] => Ok(Self {
                project: None,
                dataset: Some(owned(dataset)),
                table: owned(table),
            }),
            [project, dataset, table] => Ok(Self {
                project: Some(owned(project)),
                dataset: Some(owned(dataset)),
                table: owned(table),
            }),
            _ => Err(ConfigError::Invalid {
                key: "table_id",
                reason: format!("`{}` has more than three segments", id),
            }),
        }
    }
}

/// Settings from one configuration layer. Every field is optional so layers
/// can be stacked with [`PartialConfig::or`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub source_url: Option<String>,
    pub bucket: Option<String>,
    pub key_prefix: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub storage_emulator_host: Option<String>,
    pub database_url: Option<String>,
    pub table_id: Option<String>,
    pub scratch_dir: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub workers: Option<usize>,
    pub http_timeout_secs: Option<u64>,
    pub show_progress: Option<bool>,
    pub thresholds: PartialThresholds,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialThresholds {
    pub high_energy_min_dbfs: Option<f64>,
    pub medium_energy_min_dbfs: Option<f64>,
    pub silence_floor_dbfs: Option<f64>,
    pub long_track_min_ms: Option<i64>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        toml::from_str(&text).map_err(|e| file_error(e.to_string()))
    }

    /// Values set in `self` win; gaps are filled from `lower`.
    pub fn or(self, lower: PartialConfig) -> PartialConfig {
        PartialConfig {
            source_url: self.source_url.or(lower.source_url),
            bucket: self.bucket.or(lower.bucket),
            key_prefix: self.key_prefix.or(lower.key_prefix),
            credentials_path: self.credentials_path.or(lower.credentials_path),
            storage_emulator_host: self.storage_emulator_host.or(lower.storage_emulator_host),
            database_url: self.database_url.or(lower.database_url),
            table_id: self.table_id.or(lower.table_id),
            scratch_dir: self.scratch_dir.or(lower.scratch_dir),
            extensions: self.extensions.or(lower.extensions),
            workers: self.workers.or(lower.workers),
            http_timeout_secs: self.http_timeout_secs.or(lower.http_timeout_secs),
            show_progress: self.show_progress.or(lower.show_progress),
            thresholds: PartialThresholds {
                high_energy_min_dbfs: self
                    .thresholds
                    .high_energy_min_dbfs
                    .or(lower.thresholds.high_energy_min_dbfs),
                medium_energy_min_dbfs: self
                    .thresholds
                    .medium_energy_min_dbfs
                    .or(lower.thresholds.medium_energy_min_dbfs),
                silence_floor_dbfs: self
                    .thresholds
                    .silence_floor_dbfs
                    .or(lower.thresholds.silence_floor_dbfs),
                long_track_min_ms: self
                    .thresholds
                    .long_track_min_ms
                    .or(lower.thresholds.long_track_min_ms),
            },
        }
    }
}

/// Immutable settings for one run. Components take the parts they need at
/// construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_url: Url,
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub storage_emulator_host: Option<String>,
    pub database_url: String,
    pub table: TableRef,
    pub scratch_dir: PathBuf,
    pub thresholds: Thresholds,
    pub extensions: Vec<String>,
    pub workers: usize,
    pub http_timeout: Duration,
    pub show_progress: bool,
}

impl TryFrom<PartialConfig> for Config {
    type Error = ConfigError;

    fn try_from(partial: PartialConfig) -> Result<Self, Self::Error> {
        let source = partial.source_url.ok_or(ConfigError::Missing("source_url"))?;
        let source_url = Url::parse(&source).map_err(|e| ConfigError::Invalid {
            key: "source_url",
            reason: e.to_string(),
        })?;
        if !matches!(source_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "source_url",
                reason: format!("unsupported scheme `{}`", source_url.scheme()),
            });
        }

        let bucket = partial.bucket.ok_or(ConfigError::Missing("bucket"))?;
        if bucket.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "bucket",
                reason: "bucket name is empty".to_string(),
            });
        }

        let storage_emulator_host = partial.storage_emulator_host.filter(|h| !h.trim().is_empty());
        if partial.credentials_path.is_none() && storage_emulator_host.is_none() {
            return Err(ConfigError::Missing("credentials_path"));
        }

        let table = TableRef::parse(partial.table_id.as_deref().unwrap_or(DEFAULT_TABLE_ID))?;

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            high_energy_min_dbfs: partial
                .thresholds
                .high_energy_min_dbfs
                .unwrap_or(defaults.high_energy_min_dbfs),
            medium_energy_min_dbfs: partial
                .thresholds
                .medium_energy_min_dbfs
                .unwrap_or(defaults.medium_energy_min_dbfs),
            silence_floor_dbfs: partial
                .thresholds
                .silence_floor_dbfs
                .unwrap_or(defaults.silence_floor_dbfs),
            long_track_min_ms: partial.thresholds.long_track_min_ms,
        };
        thresholds.validate()?;

        let extensions: Vec<String> = partial
            .extensions
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(ConfigError::Invalid {
                key: "extensions",
                reason: "no audio extensions configured".to_string(),
            });
        }

        let workers = partial.workers.unwrap_or(1);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "workers",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            source_url,
            bucket: bucket.trim().to_string(),
            key_prefix: partial.key_prefix.filter(|p| !p.trim().is_empty()),
            credentials_path: partial.credentials_path,
            storage_emulator_host,
            database_url: partial.database_url.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            table,
            scratch_dir: partial.scratch_dir.unwrap_or_else(std::env::temp_dir),
            thresholds,
            extensions,
            workers,
            http_timeout: Duration::from_secs(
                partial.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            show_progress: partial.show_progress.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PartialConfig {
        PartialConfig {
            source_url: Some("https://example.com/music".to_string()),
            bucket: Some("audio-bucket".to_string()),
            credentials_path: Some(PathBuf::from("/secrets/key.json")),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::try_from(minimal()).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.table.table, "audio_metadata");
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.extensions, vec!["mp3", "wav", "ogg", "flac", "aac"]);
        assert_eq!(config.workers, 1);
        assert_eq!(config.http_timeout, Duration::from_secs(300));
        assert!(!config.show_progress);
    }

    #[test]
    fn missing_required_settings() {
        let mut partial = minimal();
        partial.source_url = None;
        assert!(matches!(Config::try_from(partial), Err(ConfigError::Missing("source_url"))));

        let mut partial = minimal();
        partial.bucket = None;
        assert!(matches!(Config::try_from(partial), Err(ConfigError::Missing("bucket"))));

        let mut partial = minimal();
        partial.credentials_path = None;
        assert!(matches!(
            Config::try_from(partial),
            Err(ConfigError::Missing("credentials_path"))
        ));
    }

    #[test]
    fn emulator_replaces_credentials() {
        let mut partial = minimal();
        partial.credentials_path = None;
        partial.storage_emulator_host = Some("http://localhost:4443".to_string());
        let config = Config::try_from(partial).unwrap();
        assert_eq!(config.storage_emulator_host.as_deref(), Some("http://localhost:4443"));
    }

    #[test]
    fn rejects_non_http_source() {
        let mut partial = minimal();
        partial.source_url = Some("ftp://example.com/music".to_string());
        assert!(matches!(
            Config::try_from(partial),
            Err(ConfigError::Invalid { key: "source_url", .. })
        ));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut partial = minimal();
        partial.thresholds.high_energy_min_dbfs = Some(-30.0);
        assert!(matches!(
            Config::try_from(partial),
            Err(ConfigError::Invalid { key: "high_energy_min_dbfs", .. })
        ));

        let mut partial = minimal();
        partial.thresholds.silence_floor_dbfs = Some(-10.0);
        assert!(matches!(
            Config::try_from(partial),
            Err(ConfigError::Invalid { key: "silence_floor_dbfs", .. })
        ));

        let mut partial = minimal();
        partial.thresholds.long_track_min_ms = Some(0);
        assert!(matches!(
            Config::try_from(partial),
            Err(ConfigError::Invalid { key: "long_track_min_ms", .. })
        ));
    }

    #[test]
    fn rejects_zero_workers_and_empty_extensions() {
        let mut partial = minimal();
        partial.workers = Some(0);
        assert!(Config::try_from(partial).is_err());

        let mut partial = minimal();
        partial.extensions = Some(vec![" ".to_string(), ".".to_string()]);
        assert!(Config::try_from(partial).is_err());
    }

    #[test]
    fn extensions_are_normalised() {
        let mut partial = minimal();
        partial.extensions = Some(vec![".MP3".to_string(), " Wav ".to_string()]);
        let config = Config::try_from(partial).unwrap();
        assert_eq!(config.extensions, vec!["mp3", "wav"]);
    }

    #[test]
    fn table_ref_forms() {
        let full = TableRef::parse("nth-glider.audio_files.audio_metadata").unwrap();
        assert_eq!(full.project.as_deref(), Some("nth-glider"));
        assert_eq!(full.dataset.as_deref(), Some("audio_files"));
        assert_eq!(full.table, "audio_metadata");

        let two = TableRef::parse("audio_files.audio_metadata").unwrap();
        assert_eq!(two.project, None);
        assert_eq!(two.dataset.as_deref(), Some("audio_files"));

        assert!(TableRef::parse("a..b").is_err());
        assert!(TableRef::parse("a.b.c.d").is_err());
        assert!(TableRef::parse("").is_err());
    }

    #[test]
    fn upper_layer_wins() {
        let upper = PartialConfig {
            bucket: Some("from-flags".to_string()),
            ..Default::default()
        };
        let lower = PartialConfig {
            bucket: Some("from-file".to_string()),
            table_id: Some("ds.tbl".to_string()),
            ..Default::default()
        };
        let merged = upper.or(lower);
        assert_eq!(merged.bucket.as_deref(), Some("from-flags"));
        assert_eq!(merged.table_id.as_deref(), Some("ds.tbl"));
    }

    #[test]
    fn reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(
            &path,
            r#"
source_url = "https://example.com/page"
bucket = "file-bucket"
credentials_path = "/secrets/key.json"
workers = 4

[thresholds]
high_energy_min_dbfs = -12.5
long_track_min_ms = 60000
"#,
        )
        .unwrap();

        let config = Config::try_from(PartialConfig::from_file(&path).unwrap()).unwrap();
        assert_eq!(config.bucket, "file-bucket");
        assert_eq!(config.workers, 4);
        assert_eq!(config.thresholds.high_energy_min_dbfs, -12.5);
        assert_eq!(config.thresholds.medium_energy_min_dbfs, -20.0);
        assert_eq!(config.thresholds.long_track_min_ms, Some(60_000));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "bukket = \"typo\"\n").unwrap();
        assert!(matches!(PartialConfig::from_file(&path), Err(ConfigError::File { .. })));
    }
}
