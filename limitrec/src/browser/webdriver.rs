//! WebDriver backend (fantoccini). Used as the fallback login driver.
//!
//! WebDriver cannot observe network responses, so pages from this backend
//! report no [`NetworkObserver`].

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Value, json};
use tracing::info;

use super::{
    BrowserBackend, BrowserError, BrowserPage, BrowserSession, LaunchOptions, NetworkObserver,
    Probe, Selector,
};
use crate::cookies::Cookie;

/// WebDriver "Enter" key code point.
const KEY_ENTER: &str = "\u{E007}";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct WebDriverBackend {
    url: String,
}

impl WebDriverBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn capabilities(options: &LaunchOptions) -> serde_json::Map<String, Value> {
        let mut args = vec![
            format!("--user-data-dir={}", options.profile_dir.display()),
            "--no-first-run".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
        }
        let mut caps = serde_json::Map::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("goog:chromeOptions".into(), json!({ "args": args }));
        caps
    }
}

#[async_trait]
impl BrowserBackend for WebDriverBackend {
    fn name(&self) -> &'static str {
        "webdriver"
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let client = ClientBuilder::native()
            .capabilities(Self::capabilities(options))
            .connect(&self.url)
            .await
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", self.url)))?;
        info!(endpoint = %self.url, "Connected to WebDriver");
        Ok(Box::new(WebDriverSession { client }))
    }
}

struct WebDriverSession {
    client: Client,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    /// WebDriver sessions have a single top-level page.
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        Ok(Box::new(WebDriverPage {
            client: self.client.clone(),
        }))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.client.close().await.map_err(BrowserError::protocol)
    }
}

struct WebDriverPage {
    client: Client,
}

impl WebDriverPage {
    async fn eval_bool(&self, script: String) -> Result<bool, BrowserError> {
        let value = self
            .client
            .execute(&format!("return {script};"), Vec::new())
            .await
            .map_err(BrowserError::protocol)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn find_css(&self, selector: &Selector) -> Result<fantoccini::elements::Element, BrowserError> {
        let Selector::Css(css) = selector else {
            return Err(BrowserError::Unsupported("element handles for text selectors"));
        };
        self.client
            .find(Locator::Css(css))
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| BrowserError::navigation(url, e))
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.client.refresh().await.map_err(BrowserError::protocol)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.client
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(BrowserError::protocol)
    }

    async fn probe(&self, selector: &Selector) -> Result<Probe, BrowserError> {
        self.eval_bool(selector.js_exists()).await.map(Probe::from)
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        if self.eval_bool(selector.js_click()).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<(), BrowserError> {
        match selector {
            Selector::Css(_) => {
                let element = self.find_css(selector).await?;
                element.clear().await.map_err(BrowserError::protocol)?;
                element.send_keys(text).await.map_err(BrowserError::protocol)
            }
            Selector::Text { .. } => {
                if self.eval_bool(selector.js_fill(text)).await? {
                    Ok(())
                } else {
                    Err(BrowserError::ElementNotFound(selector.to_string()))
                }
            }
        }
    }

    async fn press_enter(&self, selector: &Selector) -> Result<(), BrowserError> {
        let element = self.find_css(selector).await?;
        element
            .send_keys(KEY_ENTER)
            .await
            .map_err(BrowserError::protocol)
    }

    /// WebDriver has no navigation events; poll the document ready state.
    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        loop {
            let state = self
                .client
                .execute("return document.readyState;", Vec::new())
                .await
                .map_err(BrowserError::protocol)?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn scroll_by(&self, dy: i32) -> Result<(), BrowserError> {
        self.client
            .execute(&format!("window.scrollBy(0, {dy});"), Vec::new())
            .await
            .map(|_| ())
            .map_err(BrowserError::protocol)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        let cookies = self
            .client
            .get_all_cookies()
            .await
            .map_err(BrowserError::protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| {
                let expires = c
                    .expires_datetime()
                    .map(|dt| dt.unix_timestamp())
                    .unwrap_or(0);
                Cookie::new(c.domain().unwrap_or_default(), c.name(), c.value())
                    .with_path(c.path().unwrap_or("/"))
                    .with_secure(c.secure().unwrap_or(false))
                    .with_http_only(c.http_only().unwrap_or(false))
                    .with_expires(expires)
            })
            .collect())
    }

    fn network(&self) -> Option<&dyn NetworkObserver> {
        None
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        Ok(())
    }
}
