//! Authenticated browsing session on a persistent profile.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::CredentialError;
use crate::browser::{
    BrowserBackend, BrowserError, BrowserPage, LaunchOptions, ProfileLocks, Selector, bounded,
};
use crate::config::{AppConfig, Credentials, IdentityKind};
use crate::cookies::{self, CookieSnapshot};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const EMAIL_FIELDS: &[&str] = &[r#"input[name="mail"]"#, r#"input[type="email"]"#];
const USER_ID_FIELDS: &[&str] = &[r#"input[name="user_id"]"#, r#"input[name="username"]"#];
const PASSWORD_FIELDS: &[&str] = &[r#"input[name="password"]"#, r#"input[type="password"]"#];
const SUBMIT_BUTTONS: &[&str] = &[r#"button[type="submit"]"#, r#"input[type="submit"]"#];
const LOGIN_ERROR: &str = ".tw-login-error";

/// Owns the authenticated browser profile and its cached cookie jar.
pub struct CredentialSession {
    profile_dir: PathBuf,
    cache_json: PathBuf,
    cache_netscape: PathBuf,
    login_url: String,
    login_path: String,
    site_host: Option<String>,
    credentials: Credentials,
    refresh_interval: Duration,
    settle_timeout: Duration,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    primary: Arc<dyn BrowserBackend>,
    fallback: Option<Arc<dyn BrowserBackend>>,
    locks: Arc<ProfileLocks>,
}

impl std::fmt::Debug for CredentialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSession")
            .field("profile_dir", &self.profile_dir)
            .field("cache_json", &self.cache_json)
            .field("credentials", &self.credentials)
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|b| b.name()))
            .finish_non_exhaustive()
    }
}

impl CredentialSession {
    pub fn new(
        config: &AppConfig,
        credentials: Credentials,
        primary: Arc<dyn BrowserBackend>,
        locks: Arc<ProfileLocks>,
    ) -> Self {
        Self {
            profile_dir: config.profile_dir.clone(),
            cache_json: config.cookie_cache_json(),
            cache_netscape: config.cookie_cache_netscape(),
            login_url: config.login_url(),
            login_path: config.login_path.clone(),
            site_host: config.site_host(),
            credentials,
            refresh_interval: config.cookie_refresh_interval(),
            settle_timeout: SETTLE_TIMEOUT,
            last_refresh: Mutex::new(None),
            primary,
            fallback: None,
            locks,
        }
    }

    /// Alternate driver used when the primary backend cannot log in.
    pub fn with_fallback(mut self, fallback: Arc<dyn BrowserBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Netscape copy of the cached snapshot.
    pub fn netscape_path(&self) -> &Path {
        &self.cache_netscape
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.lock()
    }

    /// Sub-profile used by the fallback backend so it never shares the primary profile.
    fn fallback_profile_dir(&self) -> PathBuf {
        let mut name = self
            .profile_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "browser_profile".into());
        name.push("_fallback");
        self.profile_dir.with_file_name(name)
    }

    /// True when the cached snapshot is missing, unreadable, or older than the refresh interval.
    pub async fn needs_refresh(&self) -> bool {
        let modified = match tokio::fs::metadata(&self.cache_json).await {
            Ok(meta) => meta.modified(),
            Err(e) => {
                debug!(path = %self.cache_json.display(), error = %e, "No usable cookie cache");
                return true;
            }
        };
        match modified {
            // A modification time in the future counts as fresh.
            Ok(mtime) => mtime
                .elapsed()
                .map(|age| age > self.refresh_interval)
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    /// Load the cached snapshot.
    pub async fn cached_snapshot(&self) -> Result<CookieSnapshot, CredentialError> {
        Ok(cookies::load_json(&self.cache_json).await?)
    }

    /// `Cookie` header built from the cached snapshot.
    pub async fn cookie_header(&self) -> Result<String, CredentialError> {
        let snapshot = self.cached_snapshot().await?;
        Ok(cookies::to_header_string(snapshot.cookies()))
    }

    /// Log in with the primary backend on the persistent profile.
    pub async fn login(&self, headless: bool) -> Result<CookieSnapshot, CredentialError> {
        self.login_with(self.primary.as_ref(), &self.profile_dir, headless)
            .await
    }

    /// Refresh the cached cookies if stale.
    ///
    /// Failures are logged and reported as `false`.
    pub async fn refresh_if_needed(&self, headless: bool) -> bool {
        if !self.needs_refresh().await {
            debug!("Cached credentials are fresh");
            return true;
        }
        info!(backend = self.primary.name(), "Cached credentials are stale, logging in");

        match self.login(headless).await {
            Ok(_) => true,
            Err(e) => {
                warn!(backend = self.primary.name(), error = %e, "Login failed");
                self.login_with_fallback(headless).await
            }
        }
    }

    /// Refresh using a page that is already open on the primary profile.
    ///
    /// The caller holds the profile lease, so the fallback runs on its own sub-profile.
    pub async fn refresh_in_context(&self, page: &dyn BrowserPage, headless: bool) -> bool {
        if !self.needs_refresh().await {
            debug!("Cached credentials are fresh");
            return true;
        }
        info!(backend = self.primary.name(), "Cached credentials are stale, logging in");

        match self.authenticate(page, self.primary.name()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(backend = self.primary.name(), error = %e, "Login failed");
                self.login_with_fallback(headless).await
            }
        }
    }

    async fn login_with_fallback(&self, headless: bool) -> bool {
        let Some(fallback) = &self.fallback else {
            return false;
        };
        info!(backend = fallback.name(), "Retrying login with fallback backend");
        match self
            .login_with(fallback.as_ref(), &self.fallback_profile_dir(), headless)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(backend = fallback.name(), error = %e, "Fallback login failed");
                false
            }
        }
    }

    async fn login_with(
        &self,
        backend: &dyn BrowserBackend,
        profile_dir: &Path,
        headless: bool,
    ) -> Result<CookieSnapshot, CredentialError> {
        let name = backend.name();
        let _lease = self.locks.acquire(profile_dir).await;

        let session = backend
            .launch(&LaunchOptions::new(profile_dir, headless))
            .await
            .map_err(|e| CredentialError::backend(name, e))?;

        let result = match session.new_page().await {
            Ok(page) => {
                let result = self.authenticate(page.as_ref(), name).await;
                if let Err(e) = page.close().await {
                    warn!(backend = name, error = %e, "Failed to close login page");
                }
                result
            }
            Err(e) => Err(CredentialError::backend(name, e)),
        };

        if let Err(e) = session.close().await {
            warn!(backend = name, error = %e, "Failed to close login browser");
        }
        result
    }

    /// Run the login flow on `page` and persist the resulting cookies.
    async fn authenticate(
        &self,
        page: &dyn BrowserPage,
        backend: &'static str,
    ) -> Result<CookieSnapshot, CredentialError> {
        let err = |e| CredentialError::backend(backend, e);

        bounded(NAVIGATION_TIMEOUT, "opening login page", page.goto(&self.login_url))
            .await
            .map_err(err)?;

        if !self.on_login_page(page).await.map_err(err)? {
            info!(backend, "Profile is already authenticated");
            return self.store(page, backend).await;
        }

        let identities = self.credentials.identities();
        if identities.is_empty() {
            return Err(CredentialError::NoCredentials);
        }

        for (index, (kind, identity)) in identities.iter().enumerate() {
            if index > 0 {
                bounded(NAVIGATION_TIMEOUT, "opening login page", page.goto(&self.login_url))
                    .await
                    .map_err(err)?;
            }
            debug!(backend, ?kind, "Attempting login");

            match self.submit_login(page, *kind, identity).await {
                Ok(true) => {
                    info!(backend, ?kind, "Login succeeded");
                    return self.store(page, backend).await;
                }
                Ok(false) => warn!(backend, ?kind, "Login attempt rejected"),
                Err(e) => warn!(backend, ?kind, error = %e, "Login attempt failed"),
            }
        }

        Err(CredentialError::LoginRejected(identities.len()))
    }

    async fn submit_login(
        &self,
        page: &dyn BrowserPage,
        kind: IdentityKind,
        identity: &str,
    ) -> Result<bool, BrowserError> {
        let password = self.credentials.password.as_deref().unwrap_or_default();
        let identity_fields = match kind {
            IdentityKind::Email => EMAIL_FIELDS,
            IdentityKind::UserId => USER_ID_FIELDS,
        };

        let Some(identity_field) = first_present(page, identity_fields).await else {
            return Err(BrowserError::ElementNotFound(
                identity_fields.join(", "),
            ));
        };
        let Some(password_field) = first_present(page, PASSWORD_FIELDS).await else {
            return Err(BrowserError::ElementNotFound(
                PASSWORD_FIELDS.join(", "),
            ));
        };

        page.fill(&identity_field, identity).await?;
        page.fill(&password_field, password).await?;
        match first_present(page, SUBMIT_BUTTONS).await {
            Some(submit) => page.click(&submit).await?,
            None => page.press_enter(&password_field).await?,
        }

        if bounded(self.settle_timeout, "waiting for login", page.wait_for_navigation())
            .await
            .is_err()
        {
            debug!("Login navigation did not settle in time");
        }

        if self.on_login_page(page).await? {
            let error_shown = bounded(PROBE_TIMEOUT, "probing login error", async {
                page.probe(&Selector::css(LOGIN_ERROR)).await
            })
            .await
            .is_ok_and(|p| p.is_found());
            if error_shown {
                debug!("Login form reported an error");
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn on_login_page(&self, page: &dyn BrowserPage) -> Result<bool, BrowserError> {
        Ok(page.current_url().await?.contains(&self.login_path))
    }

    /// Snapshot the context cookies and persist them in both cache forms.
    async fn store(
        &self,
        page: &dyn BrowserPage,
        backend: &'static str,
    ) -> Result<CookieSnapshot, CredentialError> {
        let mut snapshot = CookieSnapshot::from_cookies(
            page.cookies()
                .await
                .map_err(|e| CredentialError::backend(backend, e))?,
        );
        if let Some(host) = &self.site_host {
            snapshot.retain_host(host);
        }

        cookies::save_json(&snapshot, &self.cache_json).await?;
        cookies::persist(snapshot.cookies(), &self.cache_netscape).await?;
        *self.last_refresh.lock() = Some(snapshot.captured_at());

        info!(count = snapshot.len(), "Saved session cookies");
        Ok(snapshot)
    }
}

/// First selector from `candidates` present on the page, each probe time-bounded.
async fn first_present(page: &dyn BrowserPage, candidates: &[&str]) -> Option<Selector> {
    for candidate in candidates {
        let selector = Selector::css(*candidate);
        match bounded(PROBE_TIMEOUT, "probing login form", page.probe(&selector)).await {
            Ok(probe) if probe.is_found() => return Some(selector),
            Ok(_) => {}
            Err(e) => debug!(selector = %selector, error = %e, "Probe failed"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBackend, FakeSite};
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> AppConfig {
        AppConfig {
            cookies_dir: tmp.path().join("cookies"),
            profile_dir: tmp.path().join("profile"),
            site_base_url: "https://example-stream.test".into(),
            ..Default::default()
        }
    }

    fn creds(email: Option<&str>, user_id: Option<&str>, password: &str) -> Credentials {
        Credentials {
            email: email.map(Into::into),
            password: Some(password.into()),
            user_id: user_id.map(Into::into),
        }
    }

    fn session(tmp: &TempDir, backend: Arc<FakeBackend>, credentials: Credentials) -> CredentialSession {
        CredentialSession::new(
            &config(tmp),
            credentials,
            backend,
            Arc::new(ProfileLocks::new()),
        )
    }

    #[tokio::test]
    async fn test_needs_refresh_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(
            FakeSite::new().with_accepted_login("a@b.c", "pw"),
        ));
        let session = session(&tmp, backend, creds(Some("a@b.c"), None, "pw"));

        assert!(session.needs_refresh().await);
        session.login(true).await.unwrap();
        assert!(!session.needs_refresh().await);
        assert!(session.last_refresh().is_some());

        let expired = CredentialSession {
            refresh_interval: Duration::ZERO,
            ..session
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(expired.needs_refresh().await);
    }

    #[tokio::test]
    async fn test_already_authenticated_profile_skips_form() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(FakeSite::new().with_logged_in(true)));
        let log = backend.log();
        let session = session(&tmp, backend, Credentials::default());

        let snapshot = session.login(true).await.unwrap();

        assert!(snapshot.get("session").is_some());
        assert!(log.lock().fills().is_empty());
        assert!(session.netscape_path().exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_user_id() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(
            FakeSite::new().with_accepted_login("alice", "pw"),
        ));
        let log = backend.log();
        let session = session(&tmp, backend, creds(Some("wrong@b.c"), Some("alice"), "pw"));

        session.login(false).await.unwrap();

        let log = log.lock();
        let filled: Vec<&str> = log.fills().into_iter().map(|(_, v)| v).collect();
        assert_eq!(filled, vec!["wrong@b.c", "pw", "alice", "pw"]);
        assert_eq!(log.sessions_closed, 1);
        assert_eq!(log.pages_closed, 1);
        assert_eq!(log.headless, vec![false]);
    }

    #[tokio::test]
    async fn test_all_identities_rejected() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(
            FakeSite::new().with_accepted_login("alice", "other"),
        ));
        let session = session(&tmp, backend, creds(Some("a@b.c"), Some("alice"), "pw"));

        let err = session.login(true).await.unwrap_err();
        assert!(matches!(err, CredentialError::LoginRejected(2)));
        assert!(session.needs_refresh().await);
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(FakeSite::new()));
        let session = session(&tmp, backend, Credentials::default());
        assert!(matches!(
            session.login(true).await,
            Err(CredentialError::NoCredentials)
        ));
    }

    #[tokio::test]
    async fn test_refresh_is_noop_when_fresh() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(FakeSite::new().with_logged_in(true)));
        let log = backend.log();
        let session = session(&tmp, backend, Credentials::default());

        assert!(session.refresh_if_needed(true).await);
        assert!(session.refresh_if_needed(true).await);
        assert_eq!(log.lock().launches, 1);
    }

    #[tokio::test]
    async fn test_refresh_uses_fallback_backend() {
        let tmp = TempDir::new().unwrap();
        let primary = Arc::new(FakeBackend::new(FakeSite::new()).fail_launches(1));
        let fallback = Arc::new(
            FakeBackend::new(FakeSite::new().with_logged_in(true)).named("fallback"),
        );
        let fallback_log = fallback.log();
        let session = session(&tmp, primary, Credentials::default()).with_fallback(fallback);

        assert!(session.refresh_if_needed(true).await);

        let log = fallback_log.lock();
        assert_eq!(log.launches, 1);
        assert!(log.profiles[0].ends_with("profile_fallback"));
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported_not_raised() {
        let tmp = TempDir::new().unwrap();
        let primary = Arc::new(FakeBackend::new(FakeSite::new()).fail_launches(5));
        let session = session(&tmp, primary, Credentials::default());
        assert!(!session.refresh_if_needed(true).await);
    }

    #[tokio::test]
    async fn test_exported_cookies_are_filtered_to_site() {
        let tmp = TempDir::new().unwrap();
        let mut site = FakeSite::new().with_logged_in(true);
        site.cookies
            .push(crate::cookies::Cookie::new(".tracker.example", "t", "1"));
        let backend = Arc::new(FakeBackend::new(site));
        let session = session(&tmp, backend, Credentials::default());

        let snapshot = session.login(true).await.unwrap();
        assert!(snapshot.get("t").is_none());
        assert!(snapshot.get("visitor").is_some());
        assert!(session.cookie_header().await.unwrap().contains("session=authenticated"));
    }
}
