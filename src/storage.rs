//! Object store uploads.

use std::future::Future;

use crate::error::UploadError;
use crate::models::LocalAudioFile;

pub mod credentials;
pub mod gcs;

pub use credentials::{ServiceAccountKey, TokenProvider};
pub use gcs::GcsObjectStore;

pub trait ObjectStore {
    /// Uploads `file` and returns the URL that durably identifies the object.
    fn upload(&self, file: &LocalAudioFile) -> impl Future<Output = Result<String, UploadError>> + Send;
}

/// Percent-encodes each path segment of an object key, keeping the slashes.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_key_keeps_separators() {
        assert_eq!(encode_key("music/Victor AD - Anymore.mp3"), "music/Victor%20AD%20-%20Anymore.mp3");
        assert_eq!(encode_key("plain.wav"), "plain.wav");
    }
}
