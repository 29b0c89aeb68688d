//! Command line and environment configuration.

use crate::manifest::DEFAULT_PATTERN;
use crate::session::LaunchOptions;
use crate::sniffer::{SnifferOptions, DEFAULT_USER_AGENT};
use crate::types::{EmptyResultMode, ErrorStatusPolicy, ResponsePolicy, WaitUntil};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Slack between our own navigation timeout and the CDP command timeout.
const CDP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);
/// CDP command timeout when navigation is unbounded.
const UNBOUNDED_CDP_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Find the HLS manifests a web page requests while it loads.
#[derive(Parser, Debug, Clone)]
#[command(name = "manifest-sniffer")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP extraction service
    Serve(ServeConfig),
    /// Extract manifests from a single page and exit
    Sniff(SniffConfig),
    /// Download and set up a managed Chromium browser
    Setup(SetupConfig),
}

/// Configuration for the setup command.
#[derive(Parser, Debug, Clone)]
pub struct SetupConfig {
    /// Force re-download even if Chromium is already installed
    #[arg(long)]
    pub force: bool,
}

/// Browser and capture options shared by `serve` and `sniff`.
#[derive(Args, Debug, Clone)]
pub struct BrowserArgs {
    /// Path to Chrome/Chromium executable (overrides auto-detection)
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub head: bool,

    /// Navigation timeout in seconds (0 disables it; a hung page then holds its browser forever)
    #[arg(long, env = "NAV_TIMEOUT", default_value = "60")]
    pub nav_timeout: u64,

    /// When navigation counts as finished
    #[arg(long, value_enum, default_value = "network-idle")]
    pub wait_until: WaitUntil,

    /// Delay after navigation for player scripts to request manifests (ms)
    #[arg(long, env = "SETTLE_MS", default_value = "8000")]
    pub settle_ms: u64,

    /// User-Agent presented to the target site
    #[arg(long, env = "USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Keep the browser's own User-Agent
    #[arg(long)]
    pub no_user_agent_override: bool,

    /// Substring identifying manifest URLs
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Do not try to start the first <video> element
    #[arg(long)]
    pub no_autoplay: bool,

    /// Also scan the final page source for manifest URLs
    #[arg(long)]
    pub scan_page_source: bool,
}

impl BrowserArgs {
    fn nav_timeout(&self) -> Option<Duration> {
        (self.nav_timeout > 0).then(|| Duration::from_secs(self.nav_timeout))
    }

    /// Extraction behaviour, with an optional cap on concurrent browsers.
    pub fn sniffer_options(&self, max_sessions: Option<usize>) -> SnifferOptions {
        SnifferOptions {
            pattern: self.pattern.clone(),
            wait_until: self.wait_until,
            nav_timeout: self.nav_timeout(),
            settle: Duration::from_millis(self.settle_ms),
            user_agent: (!self.no_user_agent_override).then(|| self.user_agent.clone()),
            autoplay: !self.no_autoplay,
            scan_page_source: self.scan_page_source,
            max_sessions,
        }
    }

    /// How Chromium is started for each session.
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            chrome_executable: self.chrome_path.clone(),
            headless: !self.head,
            request_timeout: self
                .nav_timeout()
                .map(|t| t + CDP_TIMEOUT_MARGIN)
                .unwrap_or(UNBOUNDED_CDP_TIMEOUT),
        }
    }
}

/// Configuration for the serve command.
#[derive(Parser, Debug, Clone)]
pub struct ServeConfig {
    #[command(flatten)]
    pub browser: BrowserArgs,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// How a page without manifests is reported
    #[arg(long, value_enum, default_value = "not-found")]
    pub empty_result: EmptyResultMode,

    /// HTTP status for error bodies
    #[arg(long, value_enum, default_value = "status-code")]
    pub error_status: ErrorStatusPolicy,

    /// Maximum concurrent browser sessions (unbounded when unset)
    #[arg(long, env = "MAX_SESSIONS")]
    pub max_sessions: Option<usize>,
}

impl ServeConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn response_policy(&self) -> ResponsePolicy {
        ResponsePolicy {
            empty_result: self.empty_result,
            error_status: self.error_status,
        }
    }

    pub fn sniffer_options(&self) -> SnifferOptions {
        self.browser.sniffer_options(self.max_sessions)
    }
}

/// Configuration for the sniff command.
#[derive(Parser, Debug, Clone)]
pub struct SniffConfig {
    /// Page to load
    pub url: String,

    #[command(flatten)]
    pub browser: BrowserArgs,

    /// Print the JSON response body instead of a listing
    #[arg(long)]
    pub json: bool,

    /// Write `{updated_at, count, m3u8}` to this file when manifests are found
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl SniffConfig {
    pub fn target(&self) -> String {
        normalize_target(&self.url)
    }
}

/// Prefix scheme-less targets with `https://`. Blank input stays blank.
pub fn normalize_target(target: &str) -> String {
    let trimmed = target.trim();
    if trimmed.is_empty() || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
