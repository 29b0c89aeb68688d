//! Manifest extraction orchestrating one browser session per request.

use crate::manifest::{ManifestMatcher, ManifestObserver, DEFAULT_PATTERN};
use crate::session::{PageSession, SessionLauncher, SessionState};
use crate::types::{Extraction, Result, SnifferError, WaitUntil};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Desktop Chrome identification, so sites serve the real player.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_NAV_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SETTLE_MS: u64 = 8000;

/// Behaviour of a single extraction.
#[derive(Debug, Clone)]
pub struct SnifferOptions {
    /// Substring that marks a manifest URL.
    pub pattern: String,
    pub wait_until: WaitUntil,
    /// `None` blocks until the browser reports completion, however long that takes.
    pub nav_timeout: Option<Duration>,
    /// Fixed wait after navigation for player scripts to request manifests.
    pub settle: Duration,
    /// `None` keeps the browser's own user agent.
    pub user_agent: Option<String>,
    pub autoplay: bool,
    /// Also scan the final DOM for manifest URLs.
    pub scan_page_source: bool,
    /// Cap on simultaneous browser sessions. `None` is unbounded.
    pub max_sessions: Option<usize>,
}

impl Default for SnifferOptions {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            wait_until: WaitUntil::NetworkIdle,
            nav_timeout: Some(Duration::from_secs(DEFAULT_NAV_TIMEOUT_SECS)),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            autoplay: true,
            scan_page_source: false,
            max_sessions: None,
        }
    }
}

/// Loads pages and reports the manifest URLs they fetch.
///
/// Every call to [`Sniffer::extract`] launches its own browser and closes it
/// before returning, on success and failure alike.
pub struct Sniffer {
    launcher: Arc<dyn SessionLauncher>,
    matcher: Arc<ManifestMatcher>,
    options: SnifferOptions,
    permits: Option<Arc<Semaphore>>,
    active: AtomicUsize,
}

impl Sniffer {
    pub fn new(launcher: Arc<dyn SessionLauncher>, options: SnifferOptions) -> Result<Self> {
        let matcher = Arc::new(ManifestMatcher::new(&options.pattern)?);

        let permits = match options.max_sessions {
            Some(0) => {
                return Err(SnifferError::Config(
                    "max sessions must be at least 1".to_string(),
                ))
            }
            Some(limit) => Some(Arc::new(Semaphore::new(limit))),
            None => None,
        };

        if options.nav_timeout.is_none() {
            warn!("Navigation timeout disabled: a hung page will hold its browser indefinitely");
        }
        if permits.is_none() {
            debug!("No session cap: every request launches its own browser");
        }

        Ok(Self {
            launcher,
            matcher,
            options,
            permits,
            active: AtomicUsize::new(0),
        })
    }

    /// Browser sessions currently alive.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Load `target` and collect every manifest URL seen on the network.
    pub async fn extract(&self, target: Option<&str>) -> Extraction {
        let url = match validate_target(target) {
            Ok(url) => url,
            Err(e) => {
                debug!("Rejected extraction request: {}", e);
                return Extraction::Failed(e);
            }
        };

        let _permit = match &self.permits {
            Some(permits) => match permits.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return Extraction::Failed(SnifferError::Runtime(
                        "Session limiter closed".to_string(),
                    ))
                }
            },
            None => None,
        };

        let start = Instant::now();
        let observer = ManifestObserver::new(self.matcher.clone());
        let mut state = SessionState::Idle;

        advance(&mut state, SessionState::Launching, url);
        let mut session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                advance(&mut state, SessionState::Failed, url);
                error!("Browser launch failed for {}: {}", url, e);
                return Extraction::Failed(e);
            }
        };
        let _guard = ActiveSession::enter(&self.active);

        let run = self.drive(session.as_mut(), url, &observer, &mut state).await;
        let reached = state;

        advance(&mut state, SessionState::Closing, url);
        let closed = session.close().await;
        drop(session);

        match run.and(closed) {
            Ok(()) => {
                advance(&mut state, SessionState::Done, url);
                let streams = observer.snapshot().await;
                info!(
                    "Found {} manifest(s) on {} in {:.2}s",
                    streams.len(),
                    url,
                    start.elapsed().as_secs_f64()
                );
                if streams.is_empty() {
                    Extraction::NotFound
                } else {
                    Extraction::Found(streams)
                }
            }
            Err(e) => {
                advance(&mut state, SessionState::Failed, url);
                warn!("Extraction of {} failed while {}: {}", url, reached, e);
                Extraction::Failed(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut dyn PageSession,
        url: &str,
        observer: &ManifestObserver,
        state: &mut SessionState,
    ) -> Result<()> {
        session.open_page(observer.clone()).await?;
        advance(state, SessionState::PageOpen, url);

        if let Some(ref user_agent) = self.options.user_agent {
            session.set_user_agent(user_agent).await?;
        }

        advance(state, SessionState::Navigating, url);
        session
            .navigate(url, self.options.wait_until, self.options.nav_timeout)
            .await?;

        if self.options.autoplay {
            if let Err(e) = session.try_autoplay().await {
                debug!("Autoplay failed (ignored): {}", e);
            }
        }

        advance(state, SessionState::Settling, url);
        tokio::time::sleep(self.options.settle).await;

        if self.options.scan_page_source {
            match session.page_source().await {
                Ok(html) => {
                    let added = observer.observe_text(&html).await;
                    debug!("Page source scan added {} manifest(s)", added);
                }
                Err(e) => debug!("Page source scan skipped: {}", e),
            }
        }

        Ok(())
    }
}

/// Reject absent or blank targets. Anything else is handed to the browser as is.
pub fn validate_target(target: Option<&str>) -> Result<&str> {
    match target.map(str::trim) {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(SnifferError::Validation("URL required".to_string())),
    }
}

fn advance(state: &mut SessionState, next: SessionState, url: &str) {
    debug!(target_url = url, "Session {} -> {}", state, next);
    *state = next;
}

/// Counts a session as active for as long as it is held.
struct ActiveSession<'a>(&'a AtomicUsize);

impl<'a> ActiveSession<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::stub::{NavOutcome, PageScript, StubLauncher};

    fn quick_options() -> SnifferOptions {
        SnifferOptions {
            settle: Duration::ZERO,
            ..Default::default()
        }
    }

    fn sniffer_with(launcher: &Arc<StubLauncher>, options: SnifferOptions) -> Sniffer {
        Sniffer::new(launcher.clone(), options).unwrap()
    }

    #[tokio::test]
    async fn test_missing_url_never_launches() {
        let launcher = Arc::new(StubLauncher::new(PageScript::default()));
        let sniffer = sniffer_with(&launcher, quick_options());

        for target in [None, Some(""), Some("   ")] {
            let result = sniffer.extract(target).await;
            assert!(matches!(result, Extraction::Failed(SnifferError::Validation(_))));
        }
        assert_eq!(launcher.calls.launches(), 0);
        assert_eq!(launcher.calls.closes(), 0);
    }

    #[tokio::test]
    async fn test_single_manifest_with_query_string() {
        let manifest = "https://cdn.example.com/stream/index.m3u8?token=abc";
        let launcher = Arc::new(StubLauncher::new(PageScript {
            requests: vec![
                "https://example.com/app.js".to_string(),
                manifest.to_string(),
            ],
            responses: vec![manifest.to_string()],
            ..Default::default()
        }));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com/live")).await;
        match result {
            Extraction::Found(streams) => assert_eq!(streams, vec![manifest.to_string()]),
            other => panic!("expected Found, got {:?}", other),
        }
        assert_eq!(launcher.calls.launches(), 1);
        assert_eq!(launcher.calls.closes(), 1);
    }

    #[tokio::test]
    async fn test_playback_submanifests_in_order() {
        let master = "https://cdn.example.com/vod/master.m3u8";
        let variant = "https://cdn.example.com/vod/variant-720p.m3u8";
        let launcher = Arc::new(StubLauncher::new(PageScript {
            playback_requests: vec![
                master.to_string(),
                variant.to_string(),
                "https://cdn.example.com/vod/720p/seg-0.ts".to_string(),
            ],
            responses: vec![],
            ..Default::default()
        }));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com/watch")).await;
        assert_eq!(result.streams(), &[master.to_string(), variant.to_string()]);
        assert_eq!(launcher.calls.autoplays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_matching_traffic_is_not_found() {
        let launcher = Arc::new(StubLauncher::new(PageScript {
            requests: vec!["https://example.com/logo.png".to_string()],
            ..Default::default()
        }));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com")).await;
        assert!(matches!(result, Extraction::NotFound));
        assert_eq!(launcher.calls.closes(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_never_closes() {
        let launcher = Arc::new(StubLauncher::failing("No such file or directory"));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com")).await;
        assert!(matches!(result, Extraction::Failed(SnifferError::Launch(_))));
        assert_eq!(launcher.calls.launches(), 1);
        assert_eq!(launcher.calls.closes(), 0);
        assert_eq!(sniffer.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_navigation_failure_closes_once_and_drops_partial_results() {
        let launcher = Arc::new(StubLauncher::new(PageScript {
            requests: vec!["https://cdn.example.com/early.m3u8".to_string()],
            nav: NavOutcome::Timeout,
            ..Default::default()
        }));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com/slow")).await;
        match result {
            Extraction::Failed(SnifferError::Navigation(message)) => {
                assert!(message.contains("timeout"))
            }
            other => panic!("expected navigation failure, got {:?}", other),
        }
        assert_eq!(launcher.calls.closes(), 1);
        assert_eq!(sniffer.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_close_failure_discards_streams() {
        let launcher = Arc::new(StubLauncher::new(PageScript {
            requests: vec!["https://cdn.example.com/live.m3u8".to_string()],
            close_fails: true,
            ..Default::default()
        }));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com")).await;
        assert!(result.streams().is_empty());
        match result {
            Extraction::Failed(SnifferError::Runtime(message)) => {
                assert!(message.contains("close"))
            }
            other => panic!("expected close failure, got {:?}", other),
        }
        assert_eq!(launcher.calls.closes(), 1);
        assert_eq!(sniffer.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_autoplay_failure_is_ignored() {
        let launcher = Arc::new(StubLauncher::new(PageScript {
            requests: vec!["https://cdn.example.com/live.m3u8".to_string()],
            autoplay_fails: true,
            ..Default::default()
        }));
        let sniffer = sniffer_with(&launcher, quick_options());

        let result = sniffer.extract(Some("https://example.com")).await;
        assert_eq!(result.streams().len(), 1);
    }

    #[tokio::test]
    async fn test_autoplay_disabled() {
        let launcher = Arc::new(StubLauncher::new(PageScript::default()));
        let sniffer = sniffer_with(
            &launcher,
            SnifferOptions {
                autoplay: false,
                ..quick_options()
            },
        );

        sniffer.extract(Some("https://example.com")).await;
        assert_eq!(launcher.calls.autoplays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_navigation_settings_are_forwarded() {
        let launcher = Arc::new(StubLauncher::new(PageScript::default()));
        let sniffer = sniffer_with(
            &launcher,
            SnifferOptions {
                wait_until: WaitUntil::DomContentLoaded,
                nav_timeout: None,
                user_agent: None,
                ..quick_options()
            },
        );

        sniffer.extract(Some("  https://example.com/tv  ")).await;

        let navigations = launcher.calls.navigations.lock().unwrap().clone();
        assert_eq!(
            navigations,
            vec![(
                "https://example.com/tv".to_string(),
                WaitUntil::DomContentLoaded,
                None
            )]
        );
        assert!(launcher.calls.user_agents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_user_agent_applied() {
        let launcher = Arc::new(StubLauncher::new(PageScript::default()));
        let sniffer = sniffer_with(&launcher, quick_options());

        sniffer.extract(Some("https://example.com")).await;
        assert_eq!(
            *launcher.calls.user_agents.lock().unwrap(),
            vec![DEFAULT_USER_AGENT.to_string()]
        );
    }

    #[tokio::test]
    async fn test_page_source_scan() {
        let launcher = Arc::new(StubLauncher::new(PageScript {
            source: r#"<video data-src="https://cdn.example.com/embedded.m3u8"></video>"#
                .to_string(),
            ..Default::default()
        }));

        let without = sniffer_with(&launcher, quick_options());
        assert!(matches!(
            without.extract(Some("https://example.com")).await,
            Extraction::NotFound
        ));

        let with = sniffer_with(
            &launcher,
            SnifferOptions {
                scan_page_source: true,
                ..quick_options()
            },
        );
        assert_eq!(
            with.extract(Some("https://example.com")).await.streams(),
            &["https://cdn.example.com/embedded.m3u8".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_cap_serializes_launches() {
        let launcher = Arc::new(StubLauncher::new(PageScript::default()));
        let sniffer = sniffer_with(
            &launcher,
            SnifferOptions {
                settle: Duration::from_millis(100),
                max_sessions: Some(1),
                ..Default::default()
            },
        );

        let start = tokio::time::Instant::now();
        tokio::join!(
            sniffer.extract(Some("https://a.example.com")),
            sniffer.extract(Some("https://b.example.com")),
        );
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(launcher.calls.launches(), 2);
        assert_eq!(launcher.calls.closes(), 2);
    }

    #[test]
    fn test_zero_session_cap_rejected() {
        let launcher = Arc::new(StubLauncher::new(PageScript::default()));
        let result = Sniffer::new(
            launcher,
            SnifferOptions {
                max_sessions: Some(0),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(SnifferError::Config(_))));
    }
}
