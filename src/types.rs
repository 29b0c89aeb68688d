//! Core types and errors for the manifest sniffer.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while sniffing a page.
#[derive(Error, Debug)]
pub enum SnifferError {
    #[error("{0}")]
    Validation(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser session error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnifferError {
    /// Whether the caller sent a bad request rather than the session failing.
    pub fn is_validation(&self) -> bool {
        matches!(self, SnifferError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, SnifferError>;

/// Body of `POST /extract`, also the shape of the `?url=` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub url: Option<String>,
}

/// Outcome of one extraction.
#[derive(Debug)]
pub enum Extraction {
    /// At least one manifest URL was observed, in first-seen order.
    Found(Vec<String>),
    /// The page loaded but nothing matched.
    NotFound,
    /// The request was rejected or the session failed. Nothing is salvaged.
    Failed(SnifferError),
}

impl Extraction {
    /// Observed streams; empty unless `Found`.
    pub fn streams(&self) -> &[String] {
        match self {
            Extraction::Found(streams) => streams,
            _ => &[],
        }
    }
}

/// Message returned when a page loaded but fetched no manifest.
pub const NOT_FOUND_MESSAGE: &str = "No manifest found (target may be protected or non-streaming)";

/// JSON body for an extraction, shared by the HTTP service and `sniff --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractResponse {
    Streams {
        success: bool,
        count: usize,
        streams: Vec<String>,
    },
    Message {
        success: bool,
        message: String,
    },
    Error {
        error: String,
    },
}

impl ExtractResponse {
    pub fn streams(streams: Vec<String>) -> Self {
        ExtractResponse::Streams {
            success: true,
            count: streams.len(),
            streams,
        }
    }

    pub fn from_extraction(extraction: &Extraction, empty: EmptyResultMode) -> Self {
        match extraction {
            Extraction::Found(streams) => Self::streams(streams.clone()),
            Extraction::NotFound => match empty {
                EmptyResultMode::NotFound => ExtractResponse::Message {
                    success: false,
                    message: NOT_FOUND_MESSAGE.to_string(),
                },
                EmptyResultMode::EmptyList => Self::streams(Vec::new()),
            },
            Extraction::Failed(e) => ExtractResponse::Error {
                error: e.to_string(),
            },
        }
    }
}

/// File written by `sniff --output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Unix seconds.
    pub updated_at: i64,
    pub count: usize,
    /// Sorted, so repeated runs diff cleanly.
    pub m3u8: Vec<String>,
}

impl ManifestFile {
    pub fn new(streams: &[String], updated_at: i64) -> Self {
        let mut m3u8 = streams.to_vec();
        m3u8.sort();
        Self {
            updated_at,
            count: m3u8.len(),
            m3u8,
        }
    }

    /// Write as pretty-printed JSON, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// When navigation is considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitUntil {
    /// Initial document parsed. Fast, may miss late player scripts.
    DomContentLoaded,
    /// The `load` event fired.
    Load,
    /// Load fired and the network has been mostly quiet for a short window.
    #[default]
    NetworkIdle,
}

/// How an extraction with zero matches is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EmptyResultMode {
    /// `{ success: false, message }`
    #[default]
    NotFound,
    /// `{ success: true, count: 0, streams: [] }`
    EmptyList,
}

/// HTTP status used for error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ErrorStatusPolicy {
    /// 400 for validation errors, 500 for everything else.
    #[default]
    StatusCode,
    /// Always 200; the body alone carries the error.
    AlwaysOk,
}

/// Response-shaping knobs for the HTTP layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsePolicy {
    pub empty_result: EmptyResultMode,
    pub error_status: ErrorStatusPolicy,
}
