pub mod analyzer;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod store;
