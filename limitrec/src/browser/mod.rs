//! Browser automation capabilities.
//!
//! The recorder drives pages through three small traits:
//! - [`BrowserBackend`] launches a browsing context on a profile directory
//! - [`BrowserSession`] is one running context and hands out pages
//! - [`BrowserPage`] is the surface barrier navigation and login need
//!
//! Network observation is optional: [`BrowserPage::network`] returns `None`
//! for backends that cannot watch responses (WebDriver).

mod chromium;
mod error;
mod profile;
mod selector;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
#[cfg(feature = "webdriver")]
mod webdriver;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::cookies::Cookie;

pub use chromium::ChromiumBackend;
pub use error::BrowserError;
pub use profile::{ProfileLease, ProfileLocks};
pub use selector::Selector;
#[cfg(feature = "webdriver")]
pub use webdriver::WebDriverBackend;

/// Outcome of a bounded element probe. Absence is a normal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Probe {
    Found,
    NotFound,
}

impl Probe {
    pub fn is_found(self) -> bool {
        matches!(self, Self::Found)
    }
}

impl From<bool> for Probe {
    fn from(found: bool) -> Self {
        if found { Self::Found } else { Self::NotFound }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub profile_dir: PathBuf,
    pub headless: bool,
}

impl LaunchOptions {
    pub fn new(profile_dir: impl Into<PathBuf>, headless: bool) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            headless,
        }
    }
}

#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn reload(&self) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Check whether a visible element matches. Callers bound this with a timeout.
    async fn probe(&self, selector: &Selector) -> Result<Probe, BrowserError>;

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError>;

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError>;

    async fn press_enter(&self, selector: &Selector) -> Result<(), BrowserError>;

    /// Wait for a pending navigation to finish. Callers bound this with a timeout.
    async fn wait_for_navigation(&self) -> Result<(), BrowserError>;

    async fn scroll_by(&self, dy: i32) -> Result<(), BrowserError>;

    /// All cookies visible to this browsing context.
    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError>;

    fn network(&self) -> Option<&dyn NetworkObserver>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Observes network responses on a page.
#[async_trait]
pub trait NetworkObserver: Send + Sync {
    /// Stream of response URLs from the moment of subscription.
    async fn responses(&self) -> Result<BoxStream<'static, String>, BrowserError>;
}

/// Run `fut` with a deadline, mapping elapsed time to [`BrowserError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, what: &'static str, fut: F) -> Result<T, BrowserError>
where
    F: std::future::Future<Output = Result<T, BrowserError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout(limit, what)),
    }
}
