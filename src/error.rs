use thiserror::Error;

/// The source page could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("link has no usable file name: {0}")]
    NoFileName(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The body ended early or the connection dropped after the headers.
    /// A body shorter than its `Content-Length` ends up here.
    #[error("transfer from {url} interrupted after {received} bytes: {source}")]
    Interrupted {
        url: String,
        received: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported audio format in {path}: {source}")]
    Unsupported {
        path: String,
        #[source]
        source: symphonia::core::errors::Error,
    },

    #[error("no decodable audio track in {0}")]
    NoTrack(String),

    #[error("sample rate unknown for {0}")]
    UnknownSampleRate(String),

    #[error("no packet could be decoded in {path} ({skipped} corrupt packets)")]
    Corrupt { path: String, skipped: usize },

    #[error("decoder task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read credentials from {path}: {reason}")]
    Credentials { path: String, reason: String },

    #[error("failed to sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("token exchange failed: {0}")]
    Token(String),

    #[error("not authorized to write to bucket {bucket} (status {status})")]
    Unauthorized { bucket: String, status: u16 },

    #[error("bucket {0} not found")]
    BucketNotFound(String),

    #[error("upload of {key} failed with status {status}: {body}")]
    Status { key: String, status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {key}: local {local}, remote {remote}")]
    ChecksumMismatch {
        key: String,
        local: String,
        remote: String,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Failure of a single file, tagged with the stage that produced it.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("download: {0}")]
    Download(#[from] DownloadError),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("upload: {0}")]
    Upload(#[from] UploadError),

    #[error("persist: {0}")]
    Persist(#[from] PersistenceError),
}

impl FileError {
    pub fn stage(&self) -> &'static str {
        match self {
            FileError::Download(_) => "download",
            FileError::Decode(_) => "decode",
            FileError::Upload(_) => "upload",
            FileError::Persist(_) => "persist",
        }
    }
}
