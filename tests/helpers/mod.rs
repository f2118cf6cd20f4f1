//! In-process HTTP server standing in for the source page, the file host and
//! the Cloud Storage upload and token endpoints.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use sea_orm::{ConnectOptions, Database};

use audio_harvest::analyzer::AudioAnalyzer;
use audio_harvest::config::{TableRef, Thresholds};
use audio_harvest::downloader::Downloader;
use audio_harvest::extractor::LinkExtractor;
use audio_harvest::pipeline::Pipeline;
use audio_harvest::storage::gcs::Auth;
use audio_harvest::storage::GcsObjectStore;
use audio_harvest::store::SqlMetadataStore;

pub const BUCKET: &str = "adegoju_bucket";

#[derive(Default)]
pub struct ServerState {
    pub pages: Mutex<HashMap<String, String>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub upload_status: Mutex<Option<StatusCode>>,
    pub corrupt_md5: Mutex<bool>,
    pub required_token: Mutex<Option<String>>,
    pub uploads: AtomicUsize,
    pub token_requests: AtomicUsize,
}

pub struct TestServer {
    pub base: String,
    pub state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/pages/:name", get(page))
            .route("/files/:name", get(file))
            .route("/upload/storage/v1/b/:bucket/o", post(upload))
            .route("/token", post(token))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    pub fn url(&self, path: &str) -> url::Url {
        url::Url::parse(&format!("{}{}", self.base, path)).unwrap()
    }

    pub fn add_page(&self, name: &str, html: &str) {
        self.state
            .pages
            .lock()
            .unwrap()
            .insert(name.to_string(), html.to_string());
    }

    pub fn add_file(&self, name: &str, bytes: Vec<u8>) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.objects.lock().unwrap().get(key).cloned()
    }

    pub fn uploads(&self) -> usize {
        self.state.uploads.load(Ordering::SeqCst)
    }

    pub fn fail_uploads_with(&self, status: StatusCode) {
        *self.state.upload_status.lock().unwrap() = Some(status);
    }
}

async fn page(State(state): State<Arc<ServerState>>, UrlPath(name): UrlPath<String>) -> Response {
    match state.pages.lock().unwrap().get(&name) {
        Some(html) => ([("content-type", "text/html")], html.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn file(State(state): State<Arc<ServerState>>, UrlPath(name): UrlPath<String>) -> Response {
    match state.files.lock().unwrap().get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    UrlPath(bucket): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(status) = *state.upload_status.lock().unwrap() {
        return status.into_response();
    }
    if let Some(expected) = state.required_token.lock().unwrap().as_ref() {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != format!("Bearer {}", expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    if bucket != BUCKET {
        return StatusCode::NOT_FOUND.into_response();
    }
    if query.get("uploadType").map(String::as_str) != Some("media") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let Some(name) = query.get("name").cloned() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let md5_hash = if *state.corrupt_md5.lock().unwrap() {
        "AAAAAAAAAAAAAAAAAAAAAA==".to_string()
    } else {
        base64::engine::general_purpose::STANDARD.encode(md5::compute(&body).0)
    };
    state.uploads.fetch_add(1, Ordering::SeqCst);
    state.objects.lock().unwrap().insert(name.clone(), body.to_vec());

    Json(serde_json::json!({
        "kind": "storage#object",
        "name": name,
        "bucket": bucket,
        "size": body.len().to_string(),
        "md5Hash": md5_hash,
    }))
    .into_response()
}

async fn token(State(state): State<Arc<ServerState>>, body: String) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let grant_ok = body.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer")
        && body.contains("assertion=");
    if !grant_ok {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(serde_json::json!({
        "access_token": "test-access-token",
        "expires_in": 3599,
        "token_type": "Bearer",
    }))
    .into_response()
}

/// 16-bit WAV with a 440 Hz sine at `amplitude` of full scale.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize, amplitude: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            for _ in 0..channels {
                writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub async fn memory_store() -> SqlMetadataStore {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    SqlMetadataStore::open(db, TableRef::parse("audio_files.audio_metadata").unwrap())
        .await
        .unwrap()
}

pub fn emulator_store(server: &TestServer) -> GcsObjectStore {
    GcsObjectStore::new(reqwest::Client::new(), BUCKET, Auth::Anonymous).with_base_url(server.base.clone())
}

pub fn build_pipeline(
    server: &TestServer,
    scratch: &Path,
    metadata: SqlMetadataStore,
    workers: usize,
) -> Pipeline<GcsObjectStore, SqlMetadataStore> {
    let client = reqwest::Client::new();
    Pipeline::new(
        LinkExtractor::new(
            client.clone(),
            ["mp3", "wav", "ogg", "flac", "aac"].iter().map(|e| e.to_string()).collect(),
        ),
        Downloader::new(client, scratch).with_unique_names(workers > 1),
        AudioAnalyzer::new(Thresholds::default()),
        emulator_store(server),
        metadata,
    )
    .with_workers(workers)
}
