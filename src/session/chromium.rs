//! Chromium-backed sessions using the Chrome DevTools Protocol.
//!
//! Each launch gets its own browser process and temporary profile directory,
//! so concurrent extractions never share cookies, cache or service workers.
//!
//! Requires: Chrome or Chromium installed, or a managed copy from `setup`.

use crate::browser::{self, ChromeSource};
use crate::manifest::ManifestObserver;
use crate::session::{PageSession, SessionLauncher};
use crate::types::{Result, SnifferError, WaitUntil};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::{EventDomContentEventFired, NavigateParams};
use chromiumoxide::{Handler, Page};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Numbers profile directories so parallel sessions never share one.
static BROWSER_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Flags for containers: no GPU, no /dev/shm. Sandboxing is disabled via `no_sandbox()`.
const CONTAINER_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--autoplay-policy=no-user-gesture-required",
    "--mute-audio",
];

/// Starts the first `<video>` on the page. Resolves to whether one was found.
const AUTOPLAY_SCRIPT: &str = r#"
(() => {
    const v = document.querySelector('video');
    if (!v) return false;
    const p = v.play();
    if (p && typeof p.catch === 'function') p.catch(() => {});
    return true;
})()
"#;

/// In-flight requests tolerated while still calling the network idle.
const IDLE_MAX_INFLIGHT: usize = 2;
/// How long the network must stay under the threshold.
const IDLE_WINDOW: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);

/// How Chromium processes are started.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit executable; otherwise managed install, then system Chrome.
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    /// Upper bound for any single CDP command, navigation included.
    pub request_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            request_timeout: Duration::from_secs(65),
        }
    }
}

/// Launches one headless Chromium per extraction.
pub struct ChromiumLauncher {
    options: LaunchOptions,
}

impl ChromiumLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    /// Start Chromium from `source` with a private profile in `profile_dir`.
    async fn start(
        &self,
        profile_dir: &Path,
        source: &ChromeSource,
    ) -> std::result::Result<(Browser, Handler), String> {
        let config = browser_config(&self.options, profile_dir, source)?;
        Browser::launch(config).await.map_err(|e| e.to_string())
    }

    /// Launch from the first source that works. A system lookup that fails
    /// falls back to downloading Chromium; any other source is final.
    async fn launch_browser(
        &self,
        profile_dir: &Path,
    ) -> Result<(Browser, Handler, ChromeSource)> {
        let source = browser::locate_chrome(self.options.chrome_executable.as_deref());
        debug!("Starting {}", source);

        let reason = match self.start(profile_dir, &source).await {
            Ok((browser, handler)) => return Ok((browser, handler, source)),
            Err(reason) => reason,
        };
        if !source.can_fall_back() {
            return Err(SnifferError::Launch(format!("{}: {}", source, reason)));
        }

        warn!(
            "{} unavailable ({}), downloading Chromium (run `manifest-sniffer setup` to pre-install)",
            source, reason
        );
        let source = ChromeSource::Downloaded(browser::download_chrome(false).await?);
        match self.start(profile_dir, &source).await {
            Ok((browser, handler)) => Ok((browser, handler, source)),
            Err(reason) => Err(SnifferError::Launch(format!("{}: {}", source, reason))),
        }
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new(LaunchOptions::default())
    }
}

/// Headless, sandboxless Chromium with container flags and the CDP command
/// timeout from `options`.
fn browser_config(
    options: &LaunchOptions,
    profile_dir: &Path,
    source: &ChromeSource,
) -> std::result::Result<BrowserConfig, String> {
    let builder = CONTAINER_ARGS.iter().fold(
        BrowserConfig::builder()
            .no_sandbox()
            .viewport(None)
            .user_data_dir(profile_dir)
            .request_timeout(options.request_timeout),
        |builder, arg| builder.arg(*arg),
    );
    let builder = match source.executable() {
        Some(exe) => builder.chrome_executable(exe),
        None => builder,
    };
    let builder = if options.headless {
        builder
    } else {
        builder.with_head()
    };
    builder.build()
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSession>> {
        let instance_id = BROWSER_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let profile_dir = std::env::temp_dir().join(format!(
            "manifest-sniffer-{}-{}",
            std::process::id(),
            instance_id
        ));

        if let Err(e) = tokio::fs::create_dir_all(&profile_dir).await {
            debug!("Failed to create profile dir {:?}: {}", profile_dir, e);
        }

        let (browser, mut handler, source) = match self.launch_browser(&profile_dir).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile_dir(&profile_dir).await;
                return Err(e);
            }
        };

        let handler_task = tokio::spawn(async move {
            pump_handler(&mut handler).await;
        });

        info!("Launched Chromium instance {} from {}", instance_id, source);

        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            handler_task: Some(handler_task),
            page: None,
            listeners: Vec::new(),
            activity: Arc::new(Mutex::new(NetworkActivity::new(Instant::now()))),
            profile_dir,
        }))
    }
}

/// One Chromium process with one page.
struct ChromiumSession {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    page: Option<Page>,
    /// Network event pumps, aborted on close.
    listeners: Vec<JoinHandle<()>>,
    activity: Arc<Mutex<NetworkActivity>>,
    profile_dir: PathBuf,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| SnifferError::Runtime("Page is not open".to_string()))
    }

    async fn goto_dom_content_loaded(&self, page: &Page, url: &str) -> Result<()> {
        let mut dom_ready = page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(|e| SnifferError::Runtime(format!("Failed to set up event listener: {}", e)))?;

        let response = page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| SnifferError::Navigation(e.to_string()))?;

        if let Some(error_text) = &response.result.error_text {
            return Err(SnifferError::Navigation(error_text.clone()));
        }

        match dom_ready.next().await {
            Some(_) => Ok(()),
            None => Err(SnifferError::Runtime(
                "Page closed before DOMContentLoaded".to_string(),
            )),
        }
    }

    async fn goto_load(&self, page: &Page, url: &str) -> Result<()> {
        page.goto(url)
            .await
            .map(|_| ())
            .map_err(|e| SnifferError::Navigation(e.to_string()))
    }

    async fn goto(&self, url: &str, wait_until: WaitUntil) -> Result<()> {
        let page = self.page()?;
        self.activity.lock().await.reset(Instant::now());

        match wait_until {
            WaitUntil::DomContentLoaded => self.goto_dom_content_loaded(page, url).await,
            WaitUntil::Load => self.goto_load(page, url).await,
            WaitUntil::NetworkIdle => {
                self.goto_load(page, url).await?;
                debug!("Load fired, waiting for network idle");
                wait_for_network_idle(&self.activity, IDLE_WINDOW, IDLE_MAX_INFLIGHT).await;
                Ok(())
            }
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.listeners.drain(..) {
            task.abort();
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn open_page(&mut self, observer: ManifestObserver) -> Result<()> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| SnifferError::Runtime("Browser already closed".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SnifferError::Runtime(format!("Failed to create page: {}", e)))?;

        let listener_err =
            |e: chromiumoxide::error::CdpError| SnifferError::Runtime(format!("Failed to set up event listener: {}", e));

        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(listener_err)?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(listener_err)?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(listener_err)?;
        let mut failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(listener_err)?;

        let request_observer = observer.clone();
        let activity = self.activity.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                activity
                    .lock()
                    .await
                    .started(event.request_id.inner(), Instant::now());
                if request_observer.observe(&event.request.url).await {
                    debug!("Manifest request: {}", event.request.url);
                }
            }
        }));

        let response_observer = observer;
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                if response_observer.observe(&event.response.url).await {
                    debug!("Manifest response: {}", event.response.url);
                }
            }
        }));

        let activity = self.activity.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                activity
                    .lock()
                    .await
                    .finished(event.request_id.inner(), Instant::now());
            }
        }));

        let activity = self.activity.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = failed.next().await {
                activity
                    .lock()
                    .await
                    .finished(event.request_id.inner(), Instant::now());
            }
        }));

        self.page = Some(page);
        Ok(())
    }

    async fn set_user_agent(&mut self, user_agent: &str) -> Result<()> {
        self.page()?
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map(|_| ())
            .map_err(|e| SnifferError::Runtime(format!("Failed to set user agent: {}", e)))
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Option<Duration>,
    ) -> Result<()> {
        debug!("Navigating to: {} (wait until {:?})", url, wait_until);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.goto(url, wait_until))
                .await
                .map_err(|_| {
                    SnifferError::Navigation(format!(
                        "Navigation timeout of {} ms exceeded",
                        limit.as_millis()
                    ))
                })?,
            None => self.goto(url, wait_until).await,
        }
    }

    async fn try_autoplay(&mut self) -> Result<()> {
        let started = self
            .page()?
            .evaluate(AUTOPLAY_SCRIPT)
            .await
            .map_err(|e| SnifferError::Runtime(format!("Autoplay script failed: {}", e)))?
            .into_value::<bool>()
            .unwrap_or(false);

        if started {
            debug!("Requested playback on first <video> element");
        } else {
            debug!("No <video> element to autoplay");
        }
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| SnifferError::Runtime(format!("Failed to read page source: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        for task in self.listeners.drain(..) {
            task.abort();
        }
        self.page = None;

        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        // The handler must keep running until the close command is answered
        let result = browser.close().await;
        if let Err(ref e) = result {
            warn!("Graceful browser close failed, killing process: {}", e);
            if let Some(Err(kill_err)) = browser.kill().await {
                warn!("Failed to kill browser process: {}", kill_err);
            }
        }
        if let Err(e) = browser.wait().await {
            debug!("Failed waiting for browser exit: {}", e);
        }
        drop(browser);
        self.abort_tasks();

        // The process has exited, so Chrome no longer holds the profile open
        remove_profile_dir(&self.profile_dir).await;

        result
            .map(|_| ())
            .map_err(|e| SnifferError::Runtime(format!("Failed to close browser: {}", e)))
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // A dropped Browser kills its child; only the pumps are left to stop
        self.abort_tasks();
    }
}

/// Drive the CDP connection until it closes. Returns how many events failed.
///
/// A bad message must not stop the pump, or every later command times out.
async fn pump_handler<S, T, E>(events: &mut S) -> usize
where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut errors = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            errors += 1;
            debug!("Browser handler error: {}", e);
        }
    }
    errors
}

async fn remove_profile_dir(profile_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        debug!("Failed to remove profile dir {:?}: {}", profile_dir, e);
    }
}

/// In-flight request bookkeeping for the network-idle wait.
#[derive(Debug)]
struct NetworkActivity {
    inflight: HashSet<String>,
    /// Last time more than the idle threshold was in flight.
    busy_at: Instant,
}

impl NetworkActivity {
    fn new(now: Instant) -> Self {
        Self {
            inflight: HashSet::new(),
            busy_at: now,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.inflight.clear();
        self.busy_at = now;
    }

    /// Redirects reuse the request id, so they are not double counted.
    fn started(&mut self, request_id: &str, now: Instant) {
        self.inflight.insert(request_id.to_string());
        if self.inflight.len() > IDLE_MAX_INFLIGHT {
            self.busy_at = now;
        }
    }

    fn finished(&mut self, request_id: &str, now: Instant) {
        self.inflight.remove(request_id);
        if self.inflight.len() > IDLE_MAX_INFLIGHT {
            self.busy_at = now;
        }
    }

    fn is_idle(&self, now: Instant, window: Duration, max_inflight: usize) -> bool {
        self.inflight.len() <= max_inflight && now.duration_since(self.busy_at) >= window
    }
}

/// Poll until at most `max_inflight` requests have been pending for `window`.
async fn wait_for_network_idle(
    activity: &Mutex<NetworkActivity>,
    window: Duration,
    max_inflight: usize,
) {
    loop {
        if activity
            .lock()
            .await
            .is_idle(Instant::now(), window, max_inflight)
        {
            debug!("Network idle");
            return;
        }
        tokio::time::sleep(IDLE_POLL).await;
    }
}
