//! Application configuration.
//!
//! Values come from three layers, later layers winning:
//! 1. built-in defaults
//! 2. a TOML file (`--config`, else `limitrec.toml` in the working directory
//!    or the user config directory)
//! 3. `LIMITREC_*` environment variables (a `.env` file is loaded first by the binary)
//!
//! The configuration is read-only once the controller is built.

mod credentials;

pub use credentials::{Credentials, IdentityKind};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Default configuration file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "limitrec.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "LIMITREC_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Finished recordings land here.
    pub recordings_dir: PathBuf,
    /// Capture output is written here first, then moved.
    pub temp_dir: PathBuf,
    /// Cached cookie snapshots and per-session cookie files.
    pub cookies_dir: PathBuf,
    /// Persistent browser profile.
    pub profile_dir: PathBuf,
    pub logs_dir: PathBuf,

    pub max_concurrent_recordings: usize,
    pub recording_timeout_minutes: u64,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
    pub manifest_timeout_seconds: u64,
    pub cookie_refresh_hours: u64,

    /// Capture tool executable.
    pub capture_binary: String,
    /// Chromium executable; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    /// WebDriver endpoint used by the fallback login backend.
    pub webdriver_url: Option<String>,

    pub site_base_url: String,
    pub login_path: String,

    /// Use the page URL as capture input when no manifest shows up.
    pub allow_degraded: bool,

    pub log_filter: Option<String>,
    pub log_retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("recordings/videos"),
            temp_dir: PathBuf::from("recordings/temp"),
            cookies_dir: PathBuf::from("data/cookies"),
            profile_dir: PathBuf::from("data/browser_profile"),
            logs_dir: PathBuf::from("data/logs"),
            max_concurrent_recordings: 3,
            recording_timeout_minutes: 180,
            retry_attempts: 3,
            retry_delay_seconds: 5,
            manifest_timeout_seconds: 300,
            cookie_refresh_hours: 24,
            capture_binary: "yt-dlp".to_string(),
            chrome_executable: None,
            webdriver_url: None,
            site_base_url: "https://twitcasting.tv".to_string(),
            login_path: "/login".to_string(),
            allow_degraded: true,
            log_filter: None,
            log_retention_days: 7,
        }
    }
}

/// `./limitrec.toml`, else `<user config dir>/limitrec/limitrec.toml`, if either exists.
pub fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("limitrec").join(DEFAULT_CONFIG_FILE))
        .filter(|p| p.is_file())
}

impl AppConfig {
    /// Load configuration from `path` (or the default file when present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io_path("reading config file", path, e))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply `LIMITREC_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(v) = get("RECORDINGS_DIR") {
            self.recordings_dir = v.into();
        }
        if let Some(v) = get("TEMP_DIR") {
            self.temp_dir = v.into();
        }
        if let Some(v) = get("COOKIES_DIR") {
            self.cookies_dir = v.into();
        }
        if let Some(v) = get("PROFILE_DIR") {
            self.profile_dir = v.into();
        }
        if let Some(v) = get("LOGS_DIR") {
            self.logs_dir = v.into();
        }
        if let Some(v) = get("MAX_CONCURRENT_RECORDINGS") {
            self.max_concurrent_recordings = parse_env("MAX_CONCURRENT_RECORDINGS", &v)?;
        }
        if let Some(v) = get("RECORDING_TIMEOUT_MINUTES") {
            self.recording_timeout_minutes = parse_env("RECORDING_TIMEOUT_MINUTES", &v)?;
        }
        if let Some(v) = get("RETRY_ATTEMPTS") {
            self.retry_attempts = parse_env("RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY_SECONDS") {
            self.retry_delay_seconds = parse_env("RETRY_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = get("MANIFEST_TIMEOUT_SECONDS") {
            self.manifest_timeout_seconds = parse_env("MANIFEST_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("COOKIE_REFRESH_HOURS") {
            self.cookie_refresh_hours = parse_env("COOKIE_REFRESH_HOURS", &v)?;
        }
        if let Some(v) = get("CAPTURE_BINARY") {
            self.capture_binary = v;
        }
        if let Some(v) = get("CHROME_EXECUTABLE") {
            self.chrome_executable = Some(v.into());
        }
        if let Some(v) = get("WEBDRIVER_URL") {
            self.webdriver_url = Some(v);
        }
        if let Some(v) = get("SITE_BASE_URL") {
            self.site_base_url = v;
        }
        if let Some(v) = get("ALLOW_DEGRADED") {
            self.allow_degraded = parse_env("ALLOW_DEGRADED", &v)?;
        }
        if let Some(v) = get("LOG_FILTER") {
            self.log_filter = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_recordings == 0 {
            return Err(Error::config("max_concurrent_recordings must be at least 1"));
        }
        if self.recording_timeout_minutes == 0 {
            return Err(Error::config("recording_timeout_minutes must be at least 1"));
        }
        if self.retry_delay_seconds == 0 {
            return Err(Error::config("retry_delay_seconds must be at least 1"));
        }
        if self.manifest_timeout_seconds == 0 {
            return Err(Error::config("manifest_timeout_seconds must be at least 1"));
        }
        url::Url::parse(&self.site_base_url)
            .map_err(|e| Error::config(format!("site_base_url is not a valid URL: {e}")))?;
        if !self.login_path.starts_with('/') {
            return Err(Error::config("login_path must start with '/'"));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.site_base_url.trim_end_matches('/'), self.login_path)
    }

    /// Host of the site, used to filter exported cookies.
    pub fn site_host(&self) -> Option<String> {
        url::Url::parse(&self.site_base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    pub fn cookie_cache_json(&self) -> PathBuf {
        self.cookies_dir.join("session_cookies.json")
    }

    pub fn cookie_cache_netscape(&self) -> PathBuf {
        self.cookies_dir.join("session_cookies.txt")
    }

    pub fn cookie_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cookie_refresh_hours.saturating_mul(60 * 60))
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_seconds)
    }

    pub fn recording_timeout(&self) -> Duration {
        Duration::from_secs(self.recording_timeout_minutes.saturating_mul(60))
    }

    /// Create every working directory.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.recordings_dir,
            &self.temp_dir,
            &self.cookies_dir,
            &self.profile_dir,
            &self.logs_dir,
        ] {
            crate::utils::fs::ensure_dir_all_sync_with_op("creating working directory", dir)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{ENV_PREFIX}{name}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_concurrent_recordings, 3);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay_seconds, 5);
        assert_eq!(config.recording_timeout_minutes, 180);
        assert_eq!(config.cookie_refresh_interval(), Duration::from_secs(86_400));
        assert_eq!(config.login_url(), "https://twitcasting.tv/login");
        assert_eq!(config.site_host().as_deref(), Some("twitcasting.tv"));
        config.validate().unwrap();
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = AppConfig {
            cookie_refresh_hours: u64::MAX,
            recording_timeout_minutes: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.cookie_refresh_interval(), Duration::from_secs(u64::MAX));
        assert_eq!(config.recording_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_partial_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("limitrec.toml");
        std::fs::write(
            &path,
            "max_concurrent_recordings = 1\ncapture_binary = \"/opt/yt-dlp\"\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.max_concurrent_recordings, 1);
        assert_eq!(config.capture_binary, "/opt/yt-dlp");
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "max_concurrent_recordings = \"many\"").unwrap();
        assert!(matches!(
            AppConfig::from_file(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LIMITREC_RETRY_ATTEMPTS", "5"),
            ("LIMITREC_ALLOW_DEGRADED", "false"),
            ("LIMITREC_WEBDRIVER_URL", "http://localhost:4444"),
            ("LIMITREC_TEMP_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.retry_attempts, 5);
        assert!(!config.allow_degraded);
        assert_eq!(config.webdriver_url.as_deref(), Some("http://localhost:4444"));
        assert_eq!(config.temp_dir, PathBuf::from("recordings/temp"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "LIMITREC_RETRY_ATTEMPTS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LIMITREC_RETRY_ATTEMPTS"));
    }

    #[test]
    fn test_validation() {
        let config = AppConfig {
            max_concurrent_recordings: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            site_base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_show_is_toml() {
        let shown = AppConfig::default().show().unwrap();
        assert!(shown.contains("max_concurrent_recordings = 3"));
    }
}
