//! Per-recording options.

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::{Error, Result};

pub const DEFAULT_TIMEOUT_MINUTES: u64 = 180;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// Capture quality requested by the operator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Quality {
    #[default]
    Best,
    Worst,
    Hd,
    Medium,
    Low,
}

impl Quality {
    /// Parse a quality name; unknown values fall back to [`Quality::Best`].
    pub fn parse_lenient(value: &str) -> Self {
        value.trim().to_ascii_lowercase().parse().unwrap_or_else(|_| {
            warn!(quality = value, "Unknown quality, using best");
            Self::Best
        })
    }

    /// yt-dlp format selector for this quality.
    pub fn format_selector(self) -> &'static str {
        match self {
            Self::Best => "b",
            Self::Worst => "w",
            Self::Hd => "b[height<=1080]/b",
            Self::Medium => "b[height<=720]/b",
            Self::Low => "b[height<=480]/w",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    /// The operator explicitly confirmed this recording.
    pub confirmed_by_user: bool,
    #[serde(serialize_with = "mask_password")]
    pub password: Option<String>,
    pub headless: bool,
    pub timeout_minutes: u64,
    pub quality: Quality,
    /// Overrides the channel name in output file names.
    pub session_name: Option<String>,
    /// When false, failures are terminal on the first attempt.
    pub auto_retry: bool,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub retry_base_delay: Duration,
    /// Record the page URL when no manifest is detected.
    pub allow_degraded: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            confirmed_by_user: false,
            password: None,
            headless: false,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            quality: Quality::Best,
            session_name: None,
            auto_retry: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            allow_degraded: true,
        }
    }
}

impl std::fmt::Debug for RecordingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingOptions")
            .field("confirmed_by_user", &self.confirmed_by_user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("headless", &self.headless)
            .field("timeout_minutes", &self.timeout_minutes)
            .field("quality", &self.quality)
            .field("session_name", &self.session_name)
            .field("auto_retry", &self.auto_retry)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("allow_degraded", &self.allow_degraded)
            .finish()
    }
}

impl RecordingOptions {
    /// Options confirmed by the operator, with defaults otherwise.
    pub fn confirmed() -> Self {
        Self {
            confirmed_by_user: true,
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_minutes < 1 {
            return Err(Error::validation("timeout_minutes must be >= 1"));
        }
        if self.retry_base_delay < Duration::from_secs(1) {
            return Err(Error::validation("retry_base_delay must be >= 1s"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    /// Retries allowed after the first attempt.
    pub fn effective_retries(&self) -> u32 {
        if self.auto_retry { self.max_retries } else { 0 }
    }
}

fn mask_password<S: Serializer>(password: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match password {
        Some(_) => serializer.serialize_some("***"),
        None => serializer.serialize_none(),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
