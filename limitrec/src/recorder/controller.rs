//! Recording session controller.
//!
//! Each recording runs as its own task through the attempt stages
//! BROWSER_STARTING, AUTHENTICATING, WAITING_FOR_STREAM and RECORDING. The
//! browser and the profile lease are released before the capture is awaited,
//! so a long recording never blocks logins for other sessions.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::options::RecordingOptions;
use super::resilience::{FailureKind, RetryConfig, StageFailure};
use super::session::{RecordingSession, RecordingStatus, SessionId};
use crate::barrier::BarrierNavigator;
use crate::browser::{
    BrowserBackend, BrowserPage, BrowserSession, LaunchOptions, ProfileLocks, bounded,
};
use crate::capture::{CaptureError, CaptureProcessSupervisor};
use crate::classifier::{StreamKind, UrlClassifier};
use crate::config::{AppConfig, Credentials};
use crate::cookies::{self, CookieSnapshot};
use crate::credentials::CredentialSession;
use crate::manifest::{ManifestWait, StreamManifestWatcher};
use crate::utils::fs;
use crate::{Error, Result};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const HISTORY_LIMIT: usize = 100;

/// Events emitted by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecorderEvent {
    StatusChanged {
        session_id: SessionId,
        channel: String,
        status: RecordingStatus,
        attempt: u32,
    },
    Finished {
        session_id: SessionId,
        status: RecordingStatus,
        final_path: Option<PathBuf>,
        error: Option<String>,
    },
}

/// Counters over the controller's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStatistics {
    pub active: usize,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub stopped: u64,
    pub max_concurrent: usize,
}

#[derive(Default)]
struct History {
    started: u64,
    completed: VecDeque<RecordingSession>,
    failed: VecDeque<RecordingSession>,
    stopped: VecDeque<RecordingSession>,
    completed_total: u64,
    failed_total: u64,
    stopped_total: u64,
}

impl History {
    fn record(&mut self, session: RecordingSession) {
        let (list, total) = match session.status {
            RecordingStatus::Completed => (&mut self.completed, &mut self.completed_total),
            RecordingStatus::Stopped => (&mut self.stopped, &mut self.stopped_total),
            _ => (&mut self.failed, &mut self.failed_total),
        };
        *total += 1;
        if list.len() == HISTORY_LIMIT {
            list.pop_front();
        }
        list.push_back(session);
    }

    fn find(&self, id: SessionId) -> Option<RecordingSession> {
        self.completed
            .iter()
            .chain(&self.failed)
            .chain(&self.stopped)
            .find(|s| s.id == id)
            .cloned()
    }
}

struct SessionEntry {
    url: String,
    state: watch::Sender<RecordingSession>,
    cancel: CancellationToken,
}

struct ControllerContext {
    config: AppConfig,
    backend: Arc<dyn BrowserBackend>,
    credentials: Arc<CredentialSession>,
    locks: Arc<ProfileLocks>,
    navigator: BarrierNavigator,
    watcher: StreamManifestWatcher,
    capture: CaptureProcessSupervisor,
    classifier: UrlClassifier,
    sessions: DashMap<SessionId, SessionEntry>,
    active_urls: DashMap<String, SessionId>,
    history: Mutex<History>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<RecorderEvent>,
}

/// Builder for [`RecordingSessionController`].
pub struct ControllerBuilder {
    config: AppConfig,
    backend: Arc<dyn BrowserBackend>,
    fallback: Option<Arc<dyn BrowserBackend>>,
    credentials: Credentials,
    locks: Arc<ProfileLocks>,
    navigator: BarrierNavigator,
    watcher: StreamManifestWatcher,
    capture: CaptureProcessSupervisor,
}

impl ControllerBuilder {
    /// Backend used for logins when the primary backend fails.
    pub fn fallback(mut self, backend: Arc<dyn BrowserBackend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn profile_locks(mut self, locks: Arc<ProfileLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn navigator(mut self, navigator: BarrierNavigator) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn watcher(mut self, watcher: StreamManifestWatcher) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn capture(mut self, capture: CaptureProcessSupervisor) -> Self {
        self.capture = capture;
        self
    }

    pub fn build(self) -> Result<RecordingSessionController> {
        self.config.validate()?;
        let classifier = UrlClassifier::new(&self.config.site_base_url)?;

        let mut credentials = CredentialSession::new(
            &self.config,
            self.credentials,
            self.backend.clone(),
            self.locks.clone(),
        );
        if let Some(fallback) = self.fallback {
            credentials = credentials.with_fallback(fallback);
        }

        let (event_tx, _) = broadcast::channel(256);
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_recordings));

        Ok(RecordingSessionController {
            ctx: Arc::new(ControllerContext {
                config: self.config,
                backend: self.backend,
                credentials: Arc::new(credentials),
                locks: self.locks,
                navigator: self.navigator,
                watcher: self.watcher,
                capture: self.capture,
                classifier,
                sessions: DashMap::new(),
                active_urls: DashMap::new(),
                history: Mutex::new(History::default()),
                slots,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                event_tx,
            }),
        })
    }
}

/// Starts, tracks and stops recording sessions.
#[derive(Clone)]
pub struct RecordingSessionController {
    ctx: Arc<ControllerContext>,
}

impl RecordingSessionController {
    pub fn builder(config: AppConfig, backend: Arc<dyn BrowserBackend>) -> ControllerBuilder {
        let capture = CaptureProcessSupervisor::new(config.capture_binary.clone());
        ControllerBuilder {
            config,
            backend,
            fallback: None,
            credentials: Credentials::default(),
            locks: Arc::new(ProfileLocks::new()),
            navigator: BarrierNavigator::new(),
            watcher: StreamManifestWatcher::new(),
            capture,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.ctx.config
    }

    pub fn credential_session(&self) -> Arc<CredentialSession> {
        self.ctx.credentials.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.ctx.event_tx.subscribe()
    }

    /// Start recording `url` in the background and return the session id.
    pub fn start(&self, url: &str, options: RecordingOptions) -> Result<SessionId> {
        if !options.confirmed_by_user {
            return Err(Error::ConfirmationRequired(url.to_string()));
        }
        options.validate()?;
        if self.ctx.shutdown.is_cancelled() {
            return Err(Error::Other("controller is shutting down".into()));
        }

        let classification = self.ctx.classifier.classify(url);
        if classification.kind == StreamKind::Movie {
            return Err(Error::validation(
                classification.error.unwrap_or_else(|| "not a live stream URL".into()),
            ));
        }
        if let Some(reason) = &classification.error {
            warn!(url, reason = %reason, "URL not recognized, recording anyway");
        }
        if classification.restrictions.has_any() {
            info!(
                url,
                kind = %classification.kind,
                restrictions = %classification.restrictions,
                "Stream may be restricted"
            );
        }

        let target_url = classification.normalized_url.clone();
        if target_url.is_empty() {
            return Err(Error::validation("stream URL is empty"));
        }
        let channel = options
            .session_name
            .clone()
            .unwrap_or_else(|| classification.channel_or_fallback());
        let session = RecordingSession::new(&target_url, channel.clone(), options.effective_retries());
        let id = session.id;

        match self.ctx.active_urls.entry(target_url.clone()) {
            Entry::Occupied(_) => return Err(Error::AlreadyRecording(target_url)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        let permit = match self.ctx.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.ctx.active_urls.remove_if(&target_url, |_, owner| *owner == id);
                return Err(Error::ConcurrencyLimit(self.ctx.config.max_concurrent_recordings));
            }
        };

        let (state, _) = watch::channel(session);
        let cancel = self.ctx.shutdown.child_token();
        self.ctx.sessions.insert(
            id,
            SessionEntry {
                url: target_url.clone(),
                state: state.clone(),
                cancel: cancel.clone(),
            },
        );
        self.ctx.history.lock().started += 1;

        info!(session_id = %id, channel = %channel, url = %target_url, ?options, "Recording session created");

        let ctx = self.ctx.clone();
        let span = info_span!("session", session_id = %id, channel = %channel);
        self.ctx.tracker.spawn(
            async move {
                ctx.run_session(state, options, cancel, permit).await;
            }
            .instrument(span),
        );

        Ok(id)
    }

    /// Record `url` and wait until the session ends.
    pub async fn record(&self, url: &str, options: RecordingOptions) -> Result<RecordingSession> {
        let id = self.start(url, options)?;
        self.wait(id).await
    }

    /// Wait until session `id` ends and return its final state.
    pub async fn wait(&self, id: SessionId) -> Result<RecordingSession> {
        let receiver = self
            .ctx
            .sessions
            .get(&id)
            .map(|entry| entry.state.subscribe());

        if let Some(mut receiver) = receiver {
            if let Ok(session) = receiver.wait_for(RecordingSession::is_finished).await {
                return Ok(session.clone());
            }
        }
        self.ctx
            .history
            .lock()
            .find(id)
            .ok_or_else(|| Error::not_found("RecordingSession", id.to_string()))
    }

    /// Request a stop. The session ends as STOPPED once its task observes the request.
    pub fn stop(&self, id: SessionId) -> Result<()> {
        match self.ctx.sessions.get(&id) {
            Some(entry) => {
                info!(session_id = %id, "Stop requested");
                entry.cancel.cancel();
                Ok(())
            }
            None => Err(Error::not_found("RecordingSession", id.to_string())),
        }
    }

    pub fn stop_url(&self, url: &str) -> Result<()> {
        let id = self
            .ctx
            .active_urls
            .get(&self.ctx.url_key(url))
            .map(|entry| *entry.value())
            .ok_or_else(|| Error::not_found("RecordingSession", url))?;
        self.stop(id)
    }

    /// Stop a session and wait for it to end.
    pub async fn stop_and_wait(&self, id: SessionId) -> Result<RecordingSession> {
        self.stop(id)?;
        self.wait(id).await
    }

    pub fn active_sessions(&self) -> Vec<RecordingSession> {
        self.ctx
            .sessions
            .iter()
            .map(|entry| entry.state.borrow().clone())
            .collect()
    }

    /// Current state of a live or finished session.
    pub fn session(&self, id: SessionId) -> Option<RecordingSession> {
        if let Some(entry) = self.ctx.sessions.get(&id) {
            return Some(entry.state.borrow().clone());
        }
        self.ctx.history.lock().find(id)
    }

    pub fn is_recording(&self, url: &str) -> bool {
        self.ctx.active_urls.contains_key(&self.ctx.url_key(url))
    }

    pub fn statistics(&self) -> RecorderStatistics {
        let history = self.ctx.history.lock();
        RecorderStatistics {
            active: self.ctx.sessions.len(),
            started: history.started,
            completed: history.completed_total,
            failed: history.failed_total,
            stopped: history.stopped_total,
            max_concurrent: self.ctx.config.max_concurrent_recordings,
        }
    }

    /// Stop every session and wait for all session tasks to finish.
    pub async fn shutdown(&self) {
        let active = self.ctx.sessions.len();
        info!(active, "Shutting down recorder");
        self.ctx.shutdown.cancel();
        self.ctx.tracker.close();
        self.ctx.tracker.wait().await;
        info!("Recorder shut down");
    }
}

/// How an attempt ended when it did not fail.
enum AttemptEnd {
    Completed(PathBuf),
    Stopped(Option<PathBuf>),
}

/// Capture input prepared while the browser is open.
struct CaptureInput {
    url: String,
    cookie_file: PathBuf,
}

impl ControllerContext {
    /// Key under which a URL is tracked while recording.
    fn url_key(&self, url: &str) -> String {
        self.classifier.classify(url).normalized_url
    }

    async fn run_session(
        self: Arc<Self>,
        state: watch::Sender<RecordingSession>,
        options: RecordingOptions,
        cancel: CancellationToken,
        _permit: OwnedSemaphorePermit,
    ) {
        let retry = RetryConfig::new(options.effective_retries(), options.retry_base_delay);
        let mut retries_done = 0;

        loop {
            if cancel.is_cancelled() {
                self.finish(&state, RecordingStatus::Stopped, None);
                break;
            }
            if !self.set_status(&state, |s| s.begin_attempt()) {
                break;
            }
            info!(attempt = state.borrow().attempt, "Recording attempt started");

            match self.run_attempt(&state, &options, &cancel).await {
                Ok(AttemptEnd::Completed(path)) => {
                    info!(path = %path.display(), "Recording completed");
                    self.finish(&state, RecordingStatus::Completed, Some(path));
                    break;
                }
                Ok(AttemptEnd::Stopped(partial)) => {
                    info!("Recording stopped");
                    self.finish(&state, RecordingStatus::Stopped, partial);
                    break;
                }
                Err(failure) => {
                    let status = match failure.kind {
                        FailureKind::Fatal => RecordingStatus::Error,
                        _ => RecordingStatus::Failed,
                    };
                    warn!(
                        attempt = state.borrow().attempt,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        "Recording attempt failed"
                    );
                    if !self.set_status(&state, |s| s.fail(status, failure.reason.clone())) {
                        break;
                    }

                    if !failure.is_retryable() || !retry.should_retry(retries_done) {
                        error!(reason = %failure.reason, status = %status, "Recording session failed");
                        self.finish(&state, status, None);
                        break;
                    }

                    retries_done += 1;
                    let delay = retry.delay_for_retry(retries_done);
                    info!(
                        retry = retries_done,
                        max_retries = retry.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        "Retrying after backoff"
                    );
                    if cancel.run_until_cancelled(tokio::time::sleep(delay)).await.is_none() {
                        self.finish(&state, RecordingStatus::Stopped, None);
                        break;
                    }
                }
            }
        }

        self.retire(&state);
    }

    async fn run_attempt(
        &self,
        state: &watch::Sender<RecordingSession>,
        options: &RecordingOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<AttemptEnd, StageFailure> {
        let profile_dir = self.config.profile_dir.clone();
        let Some(lease) = cancel.run_until_cancelled(self.locks.acquire(&profile_dir)).await else {
            return Ok(AttemptEnd::Stopped(None));
        };

        let launch = LaunchOptions::new(profile_dir.clone(), options.headless);
        let browser = match cancel.run_until_cancelled(self.backend.launch(&launch)).await {
            None => return Ok(AttemptEnd::Stopped(None)),
            Some(result) => result?,
        };
        debug!(backend = self.backend.name(), "Browser started");

        let prepared = match browser.new_page().await {
            Ok(page) => {
                let prepared = self.prepare_capture(state, options, page.as_ref(), cancel).await;
                if let Err(e) = page.close().await {
                    warn!(error = %e, "Failed to close page");
                }
                prepared
            }
            Err(e) => Err(StageFailure::fatal(e.to_string())),
        };
        close_browser(browser).await;
        drop(lease);

        match prepared? {
            Some(input) => self.record(state, options, input, cancel).await,
            None => Ok(AttemptEnd::Stopped(None)),
        }
    }

    /// Authenticate, pass barriers, find the manifest and export cookies.
    ///
    /// Returns `None` when cancelled.
    async fn prepare_capture(
        &self,
        state: &watch::Sender<RecordingSession>,
        options: &RecordingOptions,
        page: &dyn BrowserPage,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<CaptureInput>, StageFailure> {
        let target_url = state.borrow().target_url.clone();

        self.transition(state, RecordingStatus::Authenticating)?;
        let Some(refreshed) = cancel
            .run_until_cancelled(self.credentials.refresh_in_context(page, options.headless))
            .await
        else {
            return Ok(None);
        };
        if !refreshed {
            return Err(StageFailure::retryable("credential refresh failed"));
        }

        let Some(navigated) = cancel
            .run_until_cancelled(bounded(NAVIGATION_TIMEOUT, "opening stream page", page.goto(&target_url)))
            .await
        else {
            return Ok(None);
        };
        navigated?;

        let Some(outcome) = cancel
            .run_until_cancelled(self.navigator.pass_barriers(page, options.password.as_deref()))
            .await
        else {
            return Ok(None);
        };
        let outcome = outcome?;
        debug!(
            age_confirmed = outcome.age_confirmed,
            password_submitted = outcome.password_submitted,
            "Barriers passed"
        );

        self.transition(state, RecordingStatus::WaitingForStream)?;
        let wait = match self
            .watcher
            .wait_for_manifest(page, self.config.manifest_timeout(), cancel)
            .await
        {
            Ok(wait) => wait,
            Err(crate::browser::BrowserError::Unsupported(what)) => {
                warn!(what, "Backend cannot observe network responses");
                ManifestWait::TimedOut
            }
            Err(e) => return Err(e.into()),
        };

        let input_url = match wait {
            ManifestWait::Detected(manifest) => {
                self.update(state, |s| s.manifest_url = Some(manifest.clone()));
                manifest
            }
            ManifestWait::Cancelled => return Ok(None),
            ManifestWait::TimedOut if options.allow_degraded && self.config.allow_degraded => {
                warn!(url = %target_url, "No manifest detected, recording the page URL in degraded mode");
                self.update(state, |s| s.degraded = true);
                target_url.clone()
            }
            ManifestWait::TimedOut => {
                return Err(StageFailure::retryable("no stream manifest detected before timeout"));
            }
        };

        let snapshot = self.export_cookies(page).await?;
        let session_id = state.borrow().id;
        let cookie_file = self.config.cookies_dir.join(format!("capture_{session_id}.txt"));
        cookies::persist(snapshot.cookies(), &cookie_file)
            .await
            .map_err(|e| StageFailure::fatal(e.to_string()))?;
        debug!(count = snapshot.len(), path = %cookie_file.display(), "Session cookies exported");

        Ok(Some(CaptureInput {
            url: input_url,
            cookie_file,
        }))
    }

    /// Cached snapshot overlaid with the live context cookies, limited to the site.
    async fn export_cookies(&self, page: &dyn BrowserPage) -> std::result::Result<CookieSnapshot, StageFailure> {
        let mut snapshot = match self.credentials.cached_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(error = %e, "No cached cookie snapshot");
                CookieSnapshot::new()
            }
        };
        let live = page.cookies().await?;
        snapshot.merge(&CookieSnapshot::from_cookies(live));
        if let Some(host) = self.config.site_host() {
            snapshot.retain_host(&host);
        }
        Ok(snapshot)
    }

    async fn record(
        &self,
        state: &watch::Sender<RecordingSession>,
        options: &RecordingOptions,
        input: CaptureInput,
        cancel: &CancellationToken,
    ) -> std::result::Result<AttemptEnd, StageFailure> {
        if cancel.is_cancelled() {
            fs::remove_file_best_effort(&input.cookie_file, "cookie file").await;
            return Ok(AttemptEnd::Stopped(None));
        }

        let channel = state.borrow().channel.clone();
        let temp_path = self.config.temp_dir.join(output_file_name(&channel));
        if let Err(failure) = self.transition(state, RecordingStatus::Recording) {
            fs::remove_file_best_effort(&input.cookie_file, "cookie file").await;
            return Err(failure);
        }
        self.update(state, |s| {
            s.cookie_file = Some(input.cookie_file.clone());
            s.output_path = Some(temp_path.clone());
        });

        let capture = self.capture.clone().with_format(options.quality.format_selector());
        let mut handle = capture.launch(&input.url, &input.cookie_file, &temp_path).await?;
        info!(pid = ?handle.pid(), degraded = state.borrow().degraded, "Recording");

        enum Ended {
            Exited(std::result::Result<crate::capture::CaptureOutcome, CaptureError>),
            Cancelled,
            TimedOut,
        }
        let ended = tokio::select! {
            result = capture.await_completion(&mut handle) => Ended::Exited(result),
            _ = cancel.cancelled() => Ended::Cancelled,
            _ = tokio::time::sleep(options.timeout()) => Ended::TimedOut,
        };

        match ended {
            Ended::Exited(result) => {
                let outcome = result?;
                let path = capture
                    .finalize(&outcome, &temp_path, &self.config.recordings_dir)
                    .await?;
                Ok(AttemptEnd::Completed(path))
            }
            Ended::Cancelled => {
                if let Err(e) = capture.stop(&mut handle).await {
                    warn!(error = %e, "Failed to stop capture");
                }
                Ok(AttemptEnd::Stopped(self.keep_partial(&temp_path).await))
            }
            Ended::TimedOut => {
                warn!(minutes = options.timeout_minutes, "Recording timeout reached");
                if let Err(e) = capture.stop(&mut handle).await {
                    warn!(error = %e, "Failed to stop capture");
                }
                if let Some(path) = self.keep_partial(&temp_path).await {
                    self.update(state, |s| s.final_path = Some(path));
                }
                Err(StageFailure::permanent(format!(
                    "recording exceeded {} minutes",
                    options.timeout_minutes
                )))
            }
        }
    }

    /// Move a partial recording into the recordings directory, if one was written.
    async fn keep_partial(&self, temp_path: &std::path::Path) -> Option<PathBuf> {
        if !tokio::fs::try_exists(temp_path).await.unwrap_or(false) {
            return None;
        }
        let name = temp_path.file_name()?;
        let destination = self.config.recordings_dir.join(name);
        match fs::move_file(temp_path, &destination).await {
            Ok(()) => {
                info!(path = %destination.display(), "Partial recording kept");
                Some(destination)
            }
            Err(e) => {
                warn!(error = %e, "Failed to keep partial recording");
                None
            }
        }
    }

    fn transition(
        &self,
        state: &watch::Sender<RecordingSession>,
        status: RecordingStatus,
    ) -> std::result::Result<(), StageFailure> {
        let mut session = state.borrow().clone();
        session
            .transition_to(status)
            .map_err(|e| StageFailure::fatal(e.to_string()))?;
        self.publish(state, session);
        Ok(())
    }

    /// Apply a status-changing update; logs and returns false if the status machine rejects it.
    fn set_status(
        &self,
        state: &watch::Sender<RecordingSession>,
        f: impl FnOnce(&mut RecordingSession) -> Result<()>,
    ) -> bool {
        let mut session = state.borrow().clone();
        match f(&mut session) {
            Ok(()) => {
                self.publish(state, session);
                true
            }
            Err(e) => {
                error!(error = %e, "Rejected session update");
                self.finish(state, RecordingStatus::Error, None);
                false
            }
        }
    }

    /// Update fields that do not affect the status.
    fn update(&self, state: &watch::Sender<RecordingSession>, f: impl FnOnce(&mut RecordingSession)) {
        state.send_modify(f);
    }

    fn publish(&self, state: &watch::Sender<RecordingSession>, session: RecordingSession) {
        let event = RecorderEvent::StatusChanged {
            session_id: session.id,
            channel: session.channel.clone(),
            status: session.status,
            attempt: session.attempt,
        };
        debug!(status = %session.status, "Session status changed");
        state.send_replace(session);
        let _ = self.event_tx.send(event);
    }

    fn finish(&self, state: &watch::Sender<RecordingSession>, status: RecordingStatus, final_path: Option<PathBuf>) {
        let mut session = state.borrow().clone();
        if session.status != status {
            if let Err(e) = session.transition_to(status) {
                // Keep the current status; only the end marker is added.
                debug!(error = %e, "Final status not reachable");
            }
        }
        if final_path.is_some() {
            session.final_path = final_path;
        }
        session.finish();

        let event = RecorderEvent::Finished {
            session_id: session.id,
            status: session.status,
            final_path: session.final_path.clone(),
            error: session.last_error.clone(),
        };
        state.send_replace(session);
        let _ = self.event_tx.send(event);
    }

    /// Drop the session from the registry. Safe to call more than once.
    fn retire(&self, state: &watch::Sender<RecordingSession>) {
        let session = state.borrow().clone();
        let Some((_, entry)) = self.sessions.remove(&session.id) else {
            return;
        };
        self.active_urls.remove_if(&entry.url, |_, id| *id == session.id);
        info!(
            status = %session.status,
            attempts = session.attempt,
            duration_secs = session.duration().num_seconds(),
            "Recording session ended"
        );
        self.history.lock().record(session);
    }
}

async fn close_browser(browser: Box<dyn BrowserSession>) {
    if let Err(e) = browser.close().await {
        warn!(error = %e, "Failed to close browser");
    }
}

/// `{channel}_{YYYYmmdd_HHMMSS}.mp4` with unsafe characters replaced.
pub fn output_file_name(channel: &str) -> String {
    let safe: String = channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let safe = if safe.is_empty() { "recording".to_string() } else { safe };
    format!("{safe}_{}.mp4", Local::now().format("%Y%m%d_%H%M%S"))
}
