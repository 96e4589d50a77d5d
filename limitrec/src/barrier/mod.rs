//! Access barriers in front of a stream page.
//!
//! Two optional gates are handled in order: the age confirmation prompt and
//! the shared-password prompt. Page markup varies between streams, so each
//! gate is located by probing a short ordered list of candidate selectors.
//! Every probe and every settle wait is time-bounded.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserPage, Probe, Selector, bounded};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SUBMIT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BarrierError {
    /// The stream is password protected and no password was supplied.
    #[error("Stream requires a password")]
    PasswordRequired,

    #[error("Browser error while passing barriers: {0}")]
    Browser(#[from] BrowserError),
}

impl BarrierError {
    /// Retrying without new operator input cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::PasswordRequired)
    }
}

/// Which barriers were found and passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierOutcome {
    pub age_confirmed: bool,
    pub password_submitted: bool,
}

fn age_confirm_candidates() -> Vec<Selector> {
    vec![
        Selector::css(r#"input[value="はい"]"#),
        Selector::text("button", "はい"),
        Selector::css(".age-verify-yes"),
        Selector::css(r#"[data-testid="age-verify-yes"]"#),
        Selector::text("button", "Yes"),
    ]
}

fn password_input_candidates() -> Vec<Selector> {
    vec![
        Selector::css(r#"input[type="password"]"#),
        Selector::css(r#"input[name="password"]"#),
        Selector::css(r#"input[placeholder*="パスワード"]"#),
        Selector::css(r#"input[placeholder*="assword"]"#),
    ]
}

fn submit_candidates() -> Vec<Selector> {
    vec![
        Selector::css(r#"button[type="submit"]"#),
        Selector::css(r#"input[type="submit"]"#),
        Selector::text("button", "送信"),
        Selector::text("button", "OK"),
        Selector::text("button", "Submit"),
    ]
}

#[derive(Debug, Clone)]
pub struct BarrierNavigator {
    probe_timeout: Duration,
    submit_probe_timeout: Duration,
    settle_timeout: Duration,
}

impl Default for BarrierNavigator {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            submit_probe_timeout: DEFAULT_SUBMIT_PROBE_TIMEOUT,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}

impl BarrierNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self.submit_probe_timeout = self.submit_probe_timeout.min(timeout);
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Pass every barrier present on `page`.
    ///
    /// Absent barriers are skipped. A password prompt without a `password`
    /// fails with [`BarrierError::PasswordRequired`].
    pub async fn pass_barriers(
        &self,
        page: &dyn BrowserPage,
        password: Option<&str>,
    ) -> Result<BarrierOutcome, BarrierError> {
        let mut outcome = BarrierOutcome::default();

        if let Some(confirm) = self.first_present(page, &age_confirm_candidates(), self.probe_timeout).await {
            info!(selector = %confirm, "Age confirmation prompt found");
            match page.click(&confirm).await {
                Ok(()) => {
                    outcome.age_confirmed = true;
                    self.settle(page).await;
                }
                Err(e) => warn!(selector = %confirm, error = %e, "Failed to confirm age prompt"),
            }
        }

        let Some(input) = self
            .first_present(page, &password_input_candidates(), self.probe_timeout)
            .await
        else {
            debug!("No password prompt");
            return Ok(outcome);
        };

        let Some(password) = password else {
            warn!("Password prompt found but no password was supplied");
            return Err(BarrierError::PasswordRequired);
        };

        info!(selector = %input, "Submitting stream password");
        page.fill(&input, password).await?;

        match self
            .first_present(page, &submit_candidates(), self.submit_probe_timeout)
            .await
        {
            Some(submit) => page.click(&submit).await?,
            None => {
                debug!("No submit control, pressing Enter");
                page.press_enter(&input).await?;
            }
        }
        outcome.password_submitted = true;
        self.settle(page).await;

        Ok(outcome)
    }

    async fn first_present(
        &self,
        page: &dyn BrowserPage,
        candidates: &[Selector],
        timeout: Duration,
    ) -> Option<Selector> {
        for candidate in candidates {
            match bounded(timeout, "probing barrier", page.probe(candidate)).await {
                Ok(Probe::Found) => return Some(candidate.clone()),
                Ok(Probe::NotFound) => {}
                Err(e) => debug!(selector = %candidate, error = %e, "Probe failed"),
            }
        }
        None
    }

    async fn settle(&self, page: &dyn BrowserPage) {
        if let Err(e) = bounded(self.settle_timeout, "waiting for page to settle", page.wait_for_navigation()).await {
            debug!(error = %e, "Page did not settle");
        }
    }
}
