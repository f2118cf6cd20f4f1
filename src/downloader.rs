use std::path::{Path, PathBuf};

use futures::StreamExt;
use log::debug;
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;
use crate::models::{AudioLink, LocalAudioFile};

pub struct Downloader {
    client: reqwest::Client,
    scratch_dir: PathBuf,
    unique_names: bool,
}

impl Downloader {
    pub fn new(client: reqwest::Client, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            scratch_dir: scratch_dir.into(),
            unique_names: false,
        }
    }

    /// Give every download its own scratch file, for when several links
    /// with the same file name may be in flight at once.
    pub fn with_unique_names(mut self, unique: bool) -> Self {
        self.unique_names = unique;
        self
    }

    pub fn scratch_path(&self, file_name: &str) -> PathBuf {
        let name = if self.unique_names {
            let tag = uuid::Uuid::new_v4().simple().to_string();
            format!("temporary_{}_{}", &tag[..8], file_name)
        } else {
            format!("temporary_{}", file_name)
        };
        self.scratch_dir.join(name)
    }

    pub async fn download(&self, link: &AudioLink) -> Result<LocalAudioFile, DownloadError> {
        let file_name = link
            .file_name()
            .ok_or_else(|| DownloadError::NoFileName(link.to_string()))?;
        let path = self.scratch_path(&file_name);

        match self.stream_to(link, &path).await {
            Ok(size_bytes) => {
                debug!("Downloaded {} ({} bytes) to {}", link, size_bytes, path.display());
                Ok(LocalAudioFile {
                    path,
                    file_name,
                    size_bytes,
                })
            }
            Err(e) => {
                // Best effort; the file may never have been created.
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, link: &AudioLink, path: &Path) -> Result<u64, DownloadError> {
        let request_error = |source| DownloadError::Request {
            url: link.to_string(),
            source,
        };
        let write_error = |source| DownloadError::Write {
            path: path.display().to_string(),
            source,
        };

        let response = self
            .client
            .get(link.0.clone())
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: link.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(write_error)?;
        let mut file = tokio::fs::File::create(path).await.map_err(write_error)?;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Interrupted {
                url: link.to_string(),
                received,
                source,
            })?;
            file.write_all(&chunk).await.map_err(write_error)?;
            received += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok(received)
    }
}

/// Removes a processed file from scratch storage.
pub async fn cleanup(file: &LocalAudioFile) {
    if let Err(e) = tokio::fs::remove_file(&file.path).await {
        log::warn!("Failed to remove scratch file {}: {}", file.path.display(), e);
    }
}
