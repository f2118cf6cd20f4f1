use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};
use url::Url;

use crate::analyzer::AudioAnalyzer;
use crate::downloader::{self, Downloader};
use crate::error::{FetchError, FileError};
use crate::extractor::LinkExtractor;
use crate::models::{AudioLink, LocalAudioFile};
use crate::storage::ObjectStore;
use crate::store::{AudioMetadataRecord, MetadataStore};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_PARTIAL: u8 = 2;

#[derive(Debug)]
pub struct ProcessedFile {
    pub link: AudioLink,
    pub record: AudioMetadataRecord,
}

#[derive(Debug)]
pub struct FailedFile {
    pub link: AudioLink,
    pub error: FileError,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub links_found: usize,
    pub processed: Vec<ProcessedFile>,
    pub failed: Vec<FailedFile>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_complete() {
            EXIT_OK
        } else {
            EXIT_PARTIAL
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "links_found": self.links_found,
            "processed": self.processed.len(),
            "failed": self.failed.len(),
            "failures": self
                .failed
                .iter()
                .map(|f| serde_json::json!({
                    "link": f.link.as_str(),
                    "stage": f.error.stage(),
                    "error": f.error.to_string(),
                }))
                .collect::<Vec<_>>(),
        })
    }
}

/// Runs extract, download, analyze, upload and upsert for every link on a
/// page. A file that fails at any stage is reported and skipped.
pub struct Pipeline<S, M> {
    extractor: LinkExtractor,
    downloader: Downloader,
    analyzer: AudioAnalyzer,
    object_store: S,
    metadata: M,
    workers: usize,
    progress: Option<MultiProgress>,
}

impl<S: ObjectStore, M: MetadataStore> Pipeline<S, M> {
    pub fn new(
        extractor: LinkExtractor,
        downloader: Downloader,
        analyzer: AudioAnalyzer,
        object_store: S,
        metadata: M,
    ) -> Self {
        Self {
            extractor,
            downloader,
            analyzer,
            object_store,
            metadata,
            workers: 1,
            progress: None,
        }
    }

    /// Files processed at the same time. One keeps the run strictly
    /// sequential.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Option<MultiProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Fails only if the page itself cannot be fetched; per-file failures go
    /// into the report.
    pub async fn run(&self, page: &Url) -> Result<RunReport, FetchError> {
        info!("Scraping {} for audio links", page);
        let links = self.extractor.fetch_links(page).await?;

        let bar = self.progress.as_ref().map(|multi| {
            let bar = multi.add(ProgressBar::new(links.len() as u64));
            if let Ok(style) = ProgressStyle::with_template(
                "[{percent:>3}%] {pos}/{len} {wide_bar} ({eta} @ {per_sec})",
            ) {
                bar.set_style(style);
            }
            bar
        });

        let outcomes: Vec<(AudioLink, Result<AudioMetadataRecord, FileError>)> =
            futures::stream::iter(links.iter().cloned())
                .map(|link| {
                    let bar = bar.clone();
                    async move {
                        let result = self.process(&link).await;
                        if let Some(bar) = bar {
                            bar.inc(1);
                        }
                        (link, result)
                    }
                })
                .buffered(self.workers)
                .collect()
                .await;

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let mut report = RunReport {
            links_found: links.len(),
            ..Default::default()
        };
        for (link, result) in outcomes {
            match result {
                Ok(record) => report.processed.push(ProcessedFile { link, record }),
                Err(e) => {
                    error!("Failed to process {} at {} stage: {}", link, e.stage(), e);
                    report.failed.push(FailedFile { link, error: e });
                }
            }
        }

        if report.is_complete() {
            info!(
                "Run completed: {} links found, {} files processed",
                report.links_found,
                report.processed.len()
            );
        } else {
            warn!(
                "Run completed with failures: {} links found, {} processed, {} failed",
                report.links_found,
                report.processed.len(),
                report.failed.len()
            );
        }
        info!("Run summary: {}", report.summary());

        Ok(report)
    }

    pub async fn process(&self, link: &AudioLink) -> Result<AudioMetadataRecord, FileError> {
        let file = self.downloader.download(link).await?;
        let result = self.analyze_and_store(&file).await;
        downloader::cleanup(&file).await;
        result
    }

    async fn analyze_and_store(&self, file: &LocalAudioFile) -> Result<AudioMetadataRecord, FileError> {
        let metrics = self.analyzer.analyze(file).await?;
        // The row must only ever point at an object that exists.
        let gcp_url = self.object_store.upload(file).await?;

        let record = AudioMetadataRecord {
            gcp_url,
            file_name: file.file_name.clone(),
            duration_ms: metrics.duration_ms,
            loudness: metrics.loudness,
            classification: metrics.classification.to_string(),
        };
        self.metadata.upsert(&record).await?;
        Ok(record)
    }
}
