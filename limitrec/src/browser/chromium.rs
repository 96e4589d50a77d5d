//! Chromium backend over the DevTools protocol (chromiumoxide).

use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventResponseReceived};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    BrowserBackend, BrowserError, BrowserPage, BrowserSession, LaunchOptions, NetworkObserver,
    Probe, Selector,
};
use crate::cookies::Cookie;

const LAUNCH_ARGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--autoplay-policy=no-user-gesture-required",
];

/// Launches a local Chromium with a persistent profile.
#[derive(Debug, Clone, Default)]
pub struct ChromiumBackend {
    executable: Option<PathBuf>,
}

impl ChromiumBackend {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut builder = BrowserConfig::builder().user_data_dir(&options.profile_dir);
        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &self.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("chromium handler event error: {}", e);
                }
            }
        });

        info!(
            profile = %options.profile_dir.display(),
            headless = options.headless,
            "Launched chromium"
        );

        Ok(Box::new(ChromiumSession {
            browser,
            handler_task,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(BrowserError::protocol)?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        let Self {
            mut browser,
            handler_task,
        } = *self;
        let result = browser.close().await.map(|_| ()).map_err(BrowserError::protocol);
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "Failed to reap chromium process");
        }
        handler_task.abort();
        result
    }
}

struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn eval_bool(&self, script: String) -> Result<bool, BrowserError> {
        self.page
            .evaluate(script)
            .await
            .map_err(BrowserError::protocol)?
            .into_value::<bool>()
            .map_err(BrowserError::protocol)
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::navigation(url, e))
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.page
            .reload()
            .await
            .map(|_| ())
            .map_err(BrowserError::protocol)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(BrowserError::protocol)?
            .unwrap_or_default())
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
            // Real key events for inputs so page scripts see typing.
            Selector::Css(css) => {
                let element = self
                    .page
                    .find_element(css.as_str())
                    .await
                    .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
                element.click().await.map_err(BrowserError::protocol)?;
                element.type_str(text).await.map_err(BrowserError::protocol)?;
                Ok(())
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
        let Selector::Css(css) = selector else {
            return Err(BrowserError::Unsupported("pressing keys on text selectors"));
        };
        let element = self
            .page
            .find_element(css.as_str())
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element
            .press_key("Enter")
            .await
            .map(|_| ())
            .map_err(BrowserError::protocol)
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        self.page
            .wait_for_navigation()
            .await
            .map(|_| ())
            .map_err(BrowserError::protocol)
    }

    async fn scroll_by(&self, dy: i32) -> Result<(), BrowserError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {dy})"))
            .await
            .map(|_| ())
            .map_err(BrowserError::protocol)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        let cookies = self.page.get_cookies().await.map_err(BrowserError::protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| {
                Cookie::new(c.domain, c.name, c.value)
                    .with_path(c.path)
                    .with_secure(c.secure)
                    .with_http_only(c.http_only)
                    .with_expires(c.expires as i64)
            })
            .collect())
    }

    fn network(&self) -> Option<&dyn NetworkObserver> {
        Some(self)
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.page.close().await.map_err(BrowserError::protocol)
    }
}

#[async_trait]
impl NetworkObserver for ChromiumPage {
    async fn responses(&self) -> Result<BoxStream<'static, String>, BrowserError> {
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(BrowserError::protocol)?;
        let events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(BrowserError::protocol)?;
        Ok(events.map(|event| event.response.url.clone()).boxed())
    }
}
