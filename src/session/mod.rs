//! Browser session seam.
//!
//! The sniffer only talks to a browser through these two traits, so the
//! orchestration can be exercised without a real Chromium:
//! - [`SessionLauncher`] starts one isolated browser per extraction
//! - [`PageSession`] drives the single page inside it

pub mod chromium;
#[cfg(test)]
pub mod stub;

pub use chromium::{ChromiumLauncher, LaunchOptions};

use crate::manifest::ManifestObserver;
use crate::types::{Result, WaitUntil};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Starts browser sessions. One call per extraction; sessions are never reused.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageSession>>;
}

/// A live browser process owning exactly one page.
#[async_trait]
pub trait PageSession: Send {
    /// Open the page and attach request/response listeners feeding `observer`.
    async fn open_page(&mut self, observer: ManifestObserver) -> Result<()>;

    async fn set_user_agent(&mut self, user_agent: &str) -> Result<()>;

    /// Navigate and block until `wait_until` is satisfied or `timeout` elapses.
    /// `None` waits as long as the browser does.
    async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Ask the first `<video>` element to play. Callers ignore the result.
    async fn try_autoplay(&mut self) -> Result<()>;

    /// Serialized DOM of the current page.
    async fn page_source(&mut self) -> Result<String>;

    /// Tear the browser down. Called exactly once per launched session.
    async fn close(&mut self) -> Result<()>;
}

/// Per-request lifecycle, logged as the extraction advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    PageOpen,
    Navigating,
    Settling,
    Closing,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Launching => "launching",
            SessionState::PageOpen => "page-open",
            SessionState::Navigating => "navigating",
            SessionState::Settling => "settling",
            SessionState::Closing => "closing",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
