//! Scripted in-memory browser for tests.
//!
//! [`FakeSite`] describes which elements each URL shows, which network
//! responses it emits and which login is accepted. [`FakeBackend`] serves it
//! and records every page action in a shared [`FakeLog`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;

use super::{
    BrowserBackend, BrowserError, BrowserPage, BrowserSession, LaunchOptions, NetworkObserver,
    Probe, Selector,
};
use crate::cookies::Cookie;

/// A page action observed by the fake browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Goto(String),
    Reload,
    Click(Selector),
    Fill(Selector, String),
    PressEnter(Selector),
    Scroll(i32),
}

#[derive(Debug, Clone, Default)]
pub struct FakePageSpec {
    pub elements: Vec<Selector>,
    /// Response URLs emitted after subscribing, each after its delay.
    pub responses: Vec<(Duration, String)>,
}

impl FakePageSpec {
    pub fn with_elements(elements: impl IntoIterator<Item = Selector>) -> Self {
        Self {
            elements: elements.into_iter().collect(),
            responses: Vec::new(),
        }
    }

    pub fn with_responses(mut self, responses: impl IntoIterator<Item = (Duration, String)>) -> Self {
        self.responses = responses.into_iter().collect();
        self
    }
}

#[derive(Debug)]
pub struct FakeSite {
    pub login_url: String,
    pub home_url: String,
    /// Identity and password accepted by the login form.
    pub accepted_login: Option<(String, String)>,
    pub pages: HashMap<String, FakePageSpec>,
    pub cookies: Vec<Cookie>,
    /// Artificial latency for every probe.
    pub probe_delay: Duration,
    logged_in: Mutex<bool>,
}

impl Default for FakeSite {
    fn default() -> Self {
        Self {
            login_url: "https://example-stream.test/login".into(),
            home_url: "https://example-stream.test/".into(),
            accepted_login: None,
            pages: HashMap::new(),
            cookies: vec![Cookie::new(".example-stream.test", "visitor", "v1")],
            probe_delay: Duration::ZERO,
            logged_in: Mutex::new(false),
        }
    }
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accepted_login(mut self, identity: &str, password: &str) -> Self {
        self.accepted_login = Some((identity.to_string(), password.to_string()));
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn with_logged_in(self, logged_in: bool) -> Self {
        *self.logged_in.lock() = logged_in;
        self
    }

    pub fn with_page(mut self, url: impl Into<String>, spec: FakePageSpec) -> Self {
        self.pages.insert(url.into(), spec);
        self
    }

    pub fn is_logged_in(&self) -> bool {
        *self.logged_in.lock()
    }

    fn spec_for(&self, url: &str) -> Option<&FakePageSpec> {
        self.pages.get(url)
    }
}

#[derive(Debug, Default)]
pub struct FakeLog {
    pub launches: usize,
    pub sessions_closed: usize,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub profiles: Vec<PathBuf>,
    pub headless: Vec<bool>,
    pub actions: Vec<PageAction>,
}

impl FakeLog {
    pub fn clicks(&self) -> Vec<&Selector> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                PageAction::Click(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn fills(&self) -> Vec<(&Selector, &str)> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                PageAction::Fill(s, v) => Some((s, v.as_str())),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeBackend {
    name: &'static str,
    site: Arc<FakeSite>,
    log: Arc<Mutex<FakeLog>>,
    network: bool,
    failing_launches: AtomicUsize,
}

impl FakeBackend {
    pub fn new(site: FakeSite) -> Self {
        Self {
            name: "fake",
            site: Arc::new(site),
            log: Arc::default(),
            network: true,
            failing_launches: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Pages from this backend report no network capability.
    pub fn without_network(mut self) -> Self {
        self.network = false;
        self
    }

    /// The next `n` launches fail.
    pub fn fail_launches(self, n: usize) -> Self {
        self.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    pub fn log(&self) -> Arc<Mutex<FakeLog>> {
        self.log.clone()
    }

    pub fn site(&self) -> Arc<FakeSite> {
        self.site.clone()
    }

    /// A standalone page, for driving navigator or watcher tests directly.
    pub fn page(&self, url: &str) -> FakePage {
        self.log.lock().pages_opened += 1;
        FakePage {
            site: self.site.clone(),
            log: self.log.clone(),
            network: self.network,
            state: Mutex::new(PageState {
                url: url.to_string(),
                fills: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let failing = self
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrowserError::Launch("scripted launch failure".into()));
        }

        let mut log = self.log.lock();
        log.launches += 1;
        log.profiles.push(options.profile_dir.clone());
        log.headless.push(options.headless);
        drop(log);

        Ok(Box::new(FakeSession {
            site: self.site.clone(),
            log: self.log.clone(),
            network: self.network,
        }))
    }
}

struct FakeSession {
    site: Arc<FakeSite>,
    log: Arc<Mutex<FakeLog>>,
    network: bool,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        self.log.lock().pages_opened += 1;
        Ok(Box::new(FakePage {
            site: self.site.clone(),
            log: self.log.clone(),
            network: self.network,
            state: Mutex::new(PageState {
                url: "about:blank".into(),
                fills: Vec::new(),
            }),
        }))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.log.lock().sessions_closed += 1;
        Ok(())
    }
}

struct PageState {
    url: String,
    fills: Vec<(Selector, String)>,
}

pub struct FakePage {
    site: Arc<FakeSite>,
    log: Arc<Mutex<FakeLog>>,
    network: bool,
    state: Mutex<PageState>,
}

impl FakePage {
    fn record(&self, action: PageAction) {
        self.log.lock().actions.push(action);
    }

    fn has_element(&self, selector: &Selector) -> bool {
        let state = self.state.lock();
        if state.url == self.site.login_url && !self.site.is_logged_in() {
            // Every login form control exists on the login page.
            return matches!(selector, Selector::Css(_));
        }
        self.site
            .spec_for(&state.url)
            .is_some_and(|spec| spec.elements.contains(selector))
    }

    fn try_login(&self) {
        let mut state = self.state.lock();
        if state.url != self.site.login_url {
            return;
        }
        let Some((identity, password)) = &self.site.accepted_login else {
            state.fills.clear();
            return;
        };
        let values: Vec<&str> = state.fills.iter().map(|(_, v)| v.as_str()).collect();
        if values.contains(&identity.as_str()) && values.contains(&password.as_str()) {
            *self.site.logged_in.lock() = true;
            state.url = self.site.home_url.clone();
        }
        state.fills.clear();
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.record(PageAction::Goto(url.to_string()));
        let mut state = self.state.lock();
        state.fills.clear();
        state.url = if url == self.site.login_url && self.site.is_logged_in() {
            self.site.home_url.clone()
        } else {
            url.to_string()
        };
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.record(PageAction::Reload);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().url.clone())
    }

    async fn probe(&self, selector: &Selector) -> Result<Probe, BrowserError> {
        if !self.site.probe_delay.is_zero() {
            tokio::time::sleep(self.site.probe_delay).await;
        }
        Ok(Probe::from(self.has_element(selector)))
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        if !self.has_element(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(PageAction::Click(selector.clone()));
        self.try_login();
        Ok(())
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        if !self.has_element(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(PageAction::Fill(selector.clone(), text.to_string()));
        self.state.lock().fills.push((selector.clone(), text.to_string()));
        Ok(())
    }

    async fn press_enter(&self, selector: &Selector) -> Result<(), BrowserError> {
        if !self.has_element(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(PageAction::PressEnter(selector.clone()));
        self.try_login();
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn scroll_by(&self, dy: i32) -> Result<(), BrowserError> {
        self.record(PageAction::Scroll(dy));
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        let mut cookies = self.site.cookies.clone();
        if self.site.is_logged_in() {
            cookies.push(
                Cookie::new(".example-stream.test", "session", "authenticated").with_secure(true),
            );
        }
        Ok(cookies)
    }

    fn network(&self) -> Option<&dyn NetworkObserver> {
        if self.network { Some(self) } else { None }
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.log.lock().pages_closed += 1;
        Ok(())
    }
}

#[async_trait]
impl NetworkObserver for FakePage {
    async fn responses(&self) -> Result<BoxStream<'static, String>, BrowserError> {
        let url = self.state.lock().url.clone();
        let responses = self
            .site
            .spec_for(&url)
            .map(|spec| spec.responses.clone())
            .unwrap_or_default();
        Ok(stream::iter(responses)
            .then(|(delay, url)| async move {
                tokio::time::sleep(delay).await;
                url
            })
            .chain(stream::pending())
            .boxed())
    }
}
