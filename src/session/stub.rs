// Scripted launcher/session used by the sniffer and server tests.
//
// Plays back network activity into the observer and counts launch/close calls.

use crate::manifest::ManifestObserver;
use crate::session::{PageSession, SessionLauncher};
use crate::types::{Result, SnifferError, WaitUntil};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What `navigate` does after replaying the scripted traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    Ok,
    Timeout,
}

/// The simulated page.
#[derive(Debug, Clone)]
pub struct PageScript {
    pub requests: Vec<String>,
    pub responses: Vec<String>,
    /// Requested only once the video starts playing.
    pub playback_requests: Vec<String>,
    pub source: String,
    pub nav: NavOutcome,
    pub autoplay_fails: bool,
    /// `close` reports an error after counting the call.
    pub close_fails: bool,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            responses: Vec::new(),
            playback_requests: Vec::new(),
            source: "<html></html>".to_string(),
            nav: NavOutcome::Ok,
            autoplay_fails: false,
            close_fails: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub navigations: Mutex<Vec<(String, WaitUntil, Option<Duration>)>>,
    pub user_agents: Mutex<Vec<String>>,
    pub autoplays: AtomicUsize,
}

impl Calls {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct StubLauncher {
    script: PageScript,
    launch_error: Option<String>,
    pub calls: Arc<Calls>,
}

impl StubLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            launch_error: None,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Self::new(PageScript::default())
        }
    }
}

#[async_trait]
impl SessionLauncher for StubLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSession>> {
        self.calls.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.launch_error {
            return Err(SnifferError::Launch(message.clone()));
        }
        Ok(Box::new(StubSession {
            script: self.script.clone(),
            observer: None,
            calls: self.calls.clone(),
        }))
    }
}

struct StubSession {
    script: PageScript,
    observer: Option<ManifestObserver>,
    calls: Arc<Calls>,
}

impl StubSession {
    async fn replay(&self, urls: &[String]) {
        if let Some(observer) = &self.observer {
            for url in urls {
                observer.observe(url).await;
            }
        }
    }
}

#[async_trait]
impl PageSession for StubSession {
    async fn open_page(&mut self, observer: ManifestObserver) -> Result<()> {
        self.observer = Some(observer);
        Ok(())
    }

    async fn set_user_agent(&mut self, user_agent: &str) -> Result<()> {
        self.calls
            .user_agents
            .lock()
            .unwrap()
            .push(user_agent.to_string());
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.calls
            .navigations
            .lock()
            .unwrap()
            .push((url.to_string(), wait_until, timeout));

        self.replay(&self.script.requests).await;
        self.replay(&self.script.responses).await;

        match self.script.nav {
            NavOutcome::Ok => Ok(()),
            NavOutcome::Timeout => Err(SnifferError::Navigation(
                "Navigation timeout of 30000 ms exceeded".to_string(),
            )),
        }
    }

    async fn try_autoplay(&mut self) -> Result<()> {
        self.calls.autoplays.fetch_add(1, Ordering::SeqCst);
        if self.script.autoplay_fails {
            return Err(SnifferError::Runtime(
                "play() failed because the user didn't interact with the document first".to_string(),
            ));
        }
        self.replay(&self.script.playback_requests).await;
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String> {
        Ok(self.script.source.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        if self.script.close_fails {
            return Err(SnifferError::Runtime(
                "Failed to close browser: connection reset".to_string(),
            ));
        }
        Ok(())
    }
}
