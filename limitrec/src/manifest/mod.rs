//! Live manifest detection.
//!
//! The watcher subscribes to a page's network responses and waits for the
//! first response whose URL carries the manifest marker (`.m3u8`). Some pages
//! only request the playlist on activity, so the page is nudged with a small
//! scroll at a fixed cadence while waiting.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserPage, bounded};

pub const MANIFEST_MARKER: &str = ".m3u8";
pub const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_secs(300);
pub const NUDGE_INTERVAL: Duration = Duration::from_secs(5);
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);
const NUDGE_DISTANCE: i32 = 100;

/// Result of waiting for a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestWait {
    Detected(String),
    TimedOut,
    Cancelled,
}

impl ManifestWait {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Detected(url) => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamManifestWatcher {
    marker: String,
    nudge_interval: Duration,
    progress_interval: Duration,
    reload_on_start: bool,
}

impl Default for StreamManifestWatcher {
    fn default() -> Self {
        Self {
            marker: MANIFEST_MARKER.to_string(),
            nudge_interval: NUDGE_INTERVAL,
            progress_interval: PROGRESS_INTERVAL,
            reload_on_start: true,
        }
    }
}

impl StreamManifestWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload the page right after subscribing so requests issued before
    /// the subscription are replayed.
    pub fn with_reload_on_start(mut self, reload: bool) -> Self {
        self.reload_on_start = reload;
        self
    }

    pub fn with_nudge_interval(mut self, interval: Duration) -> Self {
        self.nudge_interval = interval;
        self
    }

    pub fn nudge_interval(&self) -> Duration {
        self.nudge_interval
    }

    /// Wait for the first manifest response on `page`.
    ///
    /// Returns [`ManifestWait::TimedOut`] once `timeout` elapses without a
    /// match and [`ManifestWait::Cancelled`] when `cancel` fires. Pages
    /// without network observation fail with [`BrowserError::Unsupported`].
    pub async fn wait_for_manifest(
        &self,
        page: &dyn BrowserPage,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ManifestWait, BrowserError> {
        let network = page
            .network()
            .ok_or(BrowserError::Unsupported("network observation"))?;
        let mut responses = network.responses().await?.fuse();

        let started = Instant::now();
        let deadline = sleep_until(started + timeout);
        tokio::pin!(deadline);

        if self.reload_on_start {
            if let Err(e) = page.reload().await {
                debug!(error = %e, "Reload before manifest wait failed");
            }
        }

        let mut nudge = interval_at(started + self.nudge_interval, self.nudge_interval);
        nudge.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress = interval_at(started + self.progress_interval, self.progress_interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut direction = 1;

        info!(timeout_secs = timeout.as_secs(), "Waiting for stream manifest");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Manifest wait cancelled");
                    return Ok(ManifestWait::Cancelled);
                }
                Some(url) = responses.next() => {
                    if url.contains(&self.marker) {
                        info!(elapsed_secs = started.elapsed().as_secs(), "Stream manifest detected");
                        debug!(manifest = %url, "Manifest URL");
                        return Ok(ManifestWait::Detected(url));
                    }
                }
                _ = &mut deadline => {
                    warn!(timeout_secs = timeout.as_secs(), "No stream manifest before timeout");
                    return Ok(ManifestWait::TimedOut);
                }
                _ = nudge.tick() => {
                    let dy = NUDGE_DISTANCE * direction;
                    direction = -direction;
                    if let Err(e) = bounded(self.nudge_interval, "nudging page", page.scroll_by(dy)).await {
                        debug!(error = %e, "Page nudge failed");
                    }
                }
                _ = progress.tick() => {
                    info!(elapsed_secs = started.elapsed().as_secs(), "Still waiting for stream manifest");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBackend, FakePageSpec, FakeSite, PageAction};

    const URL: &str = "https://example-stream.test/alice";

    fn backend(responses: Vec<(u64, &str)>) -> FakeBackend {
        let spec = FakePageSpec::default().with_responses(
            responses
                .into_iter()
                .map(|(ms, url)| (Duration::from_millis(ms), url.to_string())),
        );
        FakeBackend::new(FakeSite::new().with_page(URL, spec))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_wins() {
        let backend = backend(vec![
            (1_000, "https://cdn.test/player.js"),
            (2_000, "https://cdn.test/live/first.m3u8?token=a"),
            (0, "https://cdn.test/live/second.m3u8"),
        ]);
        let page = backend.page(URL);

        let result = StreamManifestWatcher::new()
            .wait_for_manifest(&page, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            result,
            ManifestWait::Detected("https://cdn.test/live/first.m3u8?token=a".into())
        );
        assert_eq!(result.url(), Some("https://cdn.test/live/first.m3u8?token=a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_nudge_interval() {
        let backend = backend(vec![(500, "https://cdn.test/player.js")]);
        let page = backend.page(URL);
        let timeout = Duration::from_secs(12);

        let started = Instant::now();
        let result = StreamManifestWatcher::new()
            .wait_for_manifest(&page, timeout, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, ManifestWait::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + NUDGE_INTERVAL);

        let log = backend.log();
        let log = log.lock();
        let scrolls: Vec<i32> = log
            .actions
            .iter()
            .filter_map(|a| match a {
                PageAction::Scroll(dy) => Some(*dy),
                _ => None,
            })
            .collect();
        assert_eq!(scrolls, vec![100, -100]);
        assert_eq!(log.actions.first(), Some(&PageAction::Reload));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let backend = backend(vec![]);
        let page = backend.page(URL);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = StreamManifestWatcher::new()
            .with_reload_on_start(false)
            .wait_for_manifest(&page, Duration::from_secs(300), &cancel)
            .await
            .unwrap();

        assert_eq!(result, ManifestWait::Cancelled);
        assert!(backend.log().lock().actions.is_empty());
    }

    #[tokio::test]
    async fn test_requires_network_capability() {
        let backend = FakeBackend::new(FakeSite::new()).without_network();
        let page = backend.page(URL);

        let err = StreamManifestWatcher::new()
            .wait_for_manifest(&page, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Unsupported(_)));
    }
}
