//! Manifest URL matching and per-session collection.

use crate::types::{Result, SnifferError};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default substring identifying an HLS manifest URL.
pub const DEFAULT_PATTERN: &str = ".m3u8";

/// Decides which URLs are manifests.
#[derive(Debug, Clone)]
pub struct ManifestMatcher {
    pattern: String,
    /// Finds absolute manifest URLs embedded in markup or script text.
    url_re: Regex,
}

impl ManifestMatcher {
    /// Build a matcher for the given substring (usually `.m3u8`).
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(SnifferError::Config(
                "Manifest pattern must not be empty".to_string(),
            ));
        }

        let url_re = RegexBuilder::new(&format!(
            r#"https?://[^'"\s>]+{}[^'"\s>]*"#,
            regex::escape(pattern)
        ))
        .case_insensitive(true)
        .build()
        .map_err(|e| SnifferError::Config(format!("Invalid manifest pattern: {}", e)))?;

        Ok(Self {
            pattern: pattern.to_string(),
            url_re,
        })
    }

    /// Plain substring test, applied to every observed request/response URL.
    pub fn is_manifest(&self, url: &str) -> bool {
        url.contains(&self.pattern)
    }

    /// Pull every manifest URL out of a blob of text (page source, inline scripts).
    pub fn scan_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.url_re.find_iter(text).map(|m| m.as_str()).collect()
    }
}

/// Insertion-ordered set of URLs.
#[derive(Debug, Default, Clone)]
pub struct ManifestSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the URL was not already present.
    pub fn insert(&mut self, url: &str) -> bool {
        if self.seen.contains(url) {
            return false;
        }
        self.seen.insert(url.to_string());
        self.order.push(url.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Shared sink the network listeners of one session write into.
///
/// Cheap to clone; every clone feeds the same set.
#[derive(Debug, Clone)]
pub struct ManifestObserver {
    matcher: Arc<ManifestMatcher>,
    found: Arc<Mutex<ManifestSet>>,
}

impl ManifestObserver {
    pub fn new(matcher: Arc<ManifestMatcher>) -> Self {
        Self {
            matcher,
            found: Arc::new(Mutex::new(ManifestSet::new())),
        }
    }

    /// Record `url` if it is a manifest. Returns `true` for a new match.
    pub async fn observe(&self, url: &str) -> bool {
        if !self.matcher.is_manifest(url) {
            return false;
        }
        self.found.lock().await.insert(url)
    }

    /// Record every manifest URL found in `text`. Returns how many were new.
    pub async fn observe_text(&self, text: &str) -> usize {
        let urls = self.matcher.scan_text(text);
        if urls.is_empty() {
            return 0;
        }
        let mut found = self.found.lock().await;
        urls.into_iter().filter(|url| found.insert(url)).count()
    }

    /// Copy of everything observed so far, in first-seen order.
    pub async fn snapshot(&self) -> Vec<String> {
        self.found.lock().await.clone().into_vec()
    }
}
