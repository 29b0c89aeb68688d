//! manifest-sniffer - find the HLS manifests a web page fetches.
//!
//! This library loads a page in a throwaway headless Chromium and:
//! - Watches every outgoing request and incoming response for `.m3u8` URLs
//! - Nudges the first `<video>` element into playback
//! - Waits for the player to settle, then tears the browser down
//!
//! # Example
//!
//! ```no_run
//! use manifest_sniffer::session::ChromiumLauncher;
//! use manifest_sniffer::{Extraction, Sniffer, SnifferOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let launcher = Arc::new(ChromiumLauncher::default());
//!     let sniffer = Sniffer::new(launcher, SnifferOptions::default()).unwrap();
//!     if let Extraction::Found(streams) = sniffer.extract(Some("https://example.com/live")).await {
//!         println!("Found {} manifests", streams.len());
//!     }
//! }
//! ```

pub mod browser;
pub mod config;
pub mod console;
pub mod manifest;
pub mod server;
pub mod session;
pub mod sniffer;
pub mod types;

pub use config::{Commands, Config, ServeConfig, SetupConfig, SniffConfig};
pub use sniffer::{Sniffer, SnifferOptions};
pub use types::{
    EmptyResultMode, ErrorStatusPolicy, ExtractResponse, Extraction, ExtractionRequest,
    ManifestFile, ResponsePolicy, Result, SnifferError, WaitUntil,
};
