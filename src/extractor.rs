use log::{debug, info};
use scraper::{ElementRef, Html};
use url::Url;

use crate::error::FetchError;
use crate::models::AudioLink;

/// Finds links to audio files on a web page.
pub struct LinkExtractor {
    client: reqwest::Client,
    extensions: Vec<String>,
}

impl LinkExtractor {
    /// `extensions` are matched case-insensitively, without the leading dot.
    pub fn new(client: reqwest::Client, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self { client, extensions }
    }

    pub async fn fetch_links(&self, page: &Url) -> Result<Vec<AudioLink>, FetchError> {
        let request_error = |source| FetchError::Request {
            url: page.to_string(),
            source,
        };

        let response = self
            .client
            .get(page.clone())
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: page.to_string(),
                status: status.as_u16(),
            });
        }
        let html = response.text().await.map_err(request_error)?;

        let links = self.extract_links(page, &html);
        info!("Found {} audio links on {}", links.len(), page);
        Ok(links)
    }

    /// Audio links in document order. Relative hrefs resolve against `page`;
    /// duplicates are kept.
    pub fn extract_links(&self, page: &Url, html: &str) -> Vec<AudioLink> {
        let document = Html::parse_document(html);

        document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "a")
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| {
                let href = href.trim();
                match page.join(href) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
                    Ok(url) => {
                        debug!("Skipping non-http link: {}", url);
                        None
                    }
                    Err(e) => {
                        debug!("Skipping unresolvable href {:?}: {}", href, e);
                        None
                    }
                }
            })
            .filter(|url| self.is_audio(url))
            .map(AudioLink)
            .collect()
    }

    fn is_audio(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext)))
    }
}
