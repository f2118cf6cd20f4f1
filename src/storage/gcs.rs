use base64::Engine;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;

use super::credentials::{ServiceAccountKey, TokenProvider};
use super::{encode_key, ObjectStore};
use crate::config::Config;
use crate::error::UploadError;
use crate::models::LocalAudioFile;

pub const GCS_BASE_URL: &str = "https://storage.googleapis.com";

pub enum Auth {
    ServiceAccount(TokenProvider),
    /// No credentials, for storage emulators.
    Anonymous,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    #[serde(default)]
    md5_hash: Option<String>,
}

/// Uploads to Google Cloud Storage with the JSON API's simple media upload.
pub struct GcsObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    key_prefix: Option<String>,
    auth: Auth,
}

impl GcsObjectStore {
    pub fn new(client: reqwest::Client, bucket: impl Into<String>, auth: Auth) -> Self {
        Self {
            client,
            base_url: GCS_BASE_URL.to_string(),
            bucket: bucket.into(),
            key_prefix: None,
            auth,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_key_prefix(mut self, prefix: Option<String>) -> Self {
        self.key_prefix = prefix.map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty());
        self
    }

    /// Talks to the emulator when one is configured, otherwise to GCS with
    /// the service account key.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, UploadError> {
        let store = match (&config.storage_emulator_host, &config.credentials_path) {
            (Some(host), _) => {
                info!("Uploading to storage emulator at {}", host);
                let base = if host.starts_with("http://") || host.starts_with("https://") {
                    host.clone()
                } else {
                    format!("http://{}", host)
                };
                GcsObjectStore::new(client, config.bucket.clone(), Auth::Anonymous).with_base_url(base)
            }
            (None, Some(path)) => {
                let key = ServiceAccountKey::from_file(path)?;
                let provider = TokenProvider::new(client.clone(), key)?;
                info!("Uploading as {}", provider.client_email());
                GcsObjectStore::new(client, config.bucket.clone(), Auth::ServiceAccount(provider))
            }
            (None, None) => {
                return Err(UploadError::Credentials {
                    path: String::new(),
                    reason: "no credentials file configured".to_string(),
                })
            }
        };
        Ok(store.with_key_prefix(config.key_prefix.clone()))
    }

    pub fn object_key(&self, file_name: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}/{}", prefix, file_name),
            None => file_name.to_string(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(&self.bucket),
            encode_key(key)
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.base_url,
            urlencoding::encode(&self.bucket)
        )
    }
}

impl ObjectStore for GcsObjectStore {
    async fn upload(&self, file: &LocalAudioFile) -> Result<String, UploadError> {
        let key = self.object_key(&file.file_name);
        let body = tokio::fs::read(&file.path)
            .await
            .map_err(|source| UploadError::Read {
                path: file.path.display().to_string(),
                source,
            })?;
        let local_md5 = base64::engine::general_purpose::STANDARD.encode(md5::compute(&body).0);
        let content_type = mime_guess::from_path(&file.file_name).first_or_octet_stream();

        let mut request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", key.as_str())])
            .header(CONTENT_TYPE, content_type.essence_str())
            .body(bytes::Bytes::from(body));
        if let Auth::ServiceAccount(provider) = &self.auth {
            request = request.bearer_auth(provider.token().await?);
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(UploadError::Unauthorized {
                    bucket: self.bucket.clone(),
                    status: status.as_u16(),
                })
            }
            StatusCode::NOT_FOUND => return Err(UploadError::BucketNotFound(self.bucket.clone())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                return Err(UploadError::Status {
                    key,
                    status: status.as_u16(),
                    body,
                });
            }
        }

        let object: ObjectResource = response.json().await?;
        if let Some(remote_md5) = object.md5_hash {
            if remote_md5 != local_md5 {
                return Err(UploadError::ChecksumMismatch {
                    key,
                    local: local_md5,
                    remote: remote_md5,
                });
            }
        }

        let url = self.public_url(&object.name);
        debug!("Uploaded {} ({} bytes) to {}", file.file_name, file.size_bytes, url);
        Ok(url)
    }
}
