//! End-to-end recording flows against the scripted browser and a shell-script capture tool.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use limitrec::Error;
use limitrec::browser::Selector;
use limitrec::browser::testing::{FakeBackend, FakeLog, FakePageSpec, FakeSite, PageAction};
use limitrec::config::AppConfig;
use limitrec::recorder::{
    RecorderEvent, RecordingOptions, RecordingSessionController, RecordingStatus, SessionId,
};
use parking_lot::Mutex;
use tempfile::TempDir;

const STREAM_URL: &str = "https://example-stream.test/alice";
const OTHER_URL: &str = "https://example-stream.test/bob";
const MANIFEST_URL: &str = "https://cdn.example-stream.test/hls/alice/playlist.m3u8";

/// Writes its arguments to `args.txt`, then the body runs with `$out` set to the output path.
const WRITE_AND_EXIT: &str = r#"echo "segment" > "$out""#;
const WRITE_AND_HANG: &str = r#"echo "segment" > "$out"; echo $$ > "$dir/pid.txt"; exec sleep 30"#;
const FAIL: &str = r#"echo "ERROR: stream offline" >&2; exit 1"#;

struct Harness {
    tmp: TempDir,
    controller: RecordingSessionController,
    log: Arc<Mutex<FakeLog>>,
}

impl Harness {
    fn new(site: FakeSite, capture_body: &str, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let tmp = TempDir::new().unwrap();
        let capture = write_capture_tool(tmp.path(), capture_body);

        let mut config = AppConfig {
            recordings_dir: tmp.path().join("videos"),
            temp_dir: tmp.path().join("temp"),
            cookies_dir: tmp.path().join("cookies"),
            profile_dir: tmp.path().join("profile"),
            logs_dir: tmp.path().join("logs"),
            site_base_url: "https://example-stream.test".into(),
            capture_binary: capture.to_string_lossy().into_owned(),
            manifest_timeout_seconds: 1,
            max_concurrent_recordings: 2,
            ..Default::default()
        };
        tweak(&mut config);
        config.ensure_directories().unwrap();

        let backend = FakeBackend::new(site.with_logged_in(true));
        let log = backend.log();
        let controller = RecordingSessionController::builder(config, Arc::new(backend))
            .build()
            .unwrap();

        Self {
            tmp,
            controller,
            log,
        }
    }

    fn capture_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.tmp.path().join("args.txt"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    async fn wait_for_status(&self, id: SessionId, status: RecordingStatus) {
        tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                if self.controller.session(id).is_some_and(|s| s.status == status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never reached {status}"));
    }
}

fn write_capture_tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("capture.sh");
    let script = format!(
        "#!/bin/sh\ndir='{dir}'\nprintf '%s\\n' \"$@\" > \"$dir/args.txt\"\nout=''\nprev=''\nfor a in \"$@\"; do\n  if [ \"$prev\" = '--output' ]; then out=\"$a\"; fi\n  prev=\"$a\"\ndone\n{body}\n",
        dir = dir.display(),
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn options() -> RecordingOptions {
    RecordingOptions {
        headless: true,
        max_retries: 0,
        retry_base_delay: Duration::from_secs(1),
        ..RecordingOptions::confirmed()
    }
}

fn stream_page(elements: Vec<Selector>, manifest: bool) -> FakeSite {
    let mut spec = FakePageSpec::with_elements(elements);
    if manifest {
        spec = spec.with_responses([
            (Duration::from_millis(10), "https://cdn.example-stream.test/player.js".to_string()),
            (Duration::from_millis(20), MANIFEST_URL.to_string()),
        ]);
    }
    FakeSite::new().with_page(STREAM_URL, spec)
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<RecorderEvent>) -> Vec<RecordingStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RecorderEvent::StatusChanged { status, .. } = event {
            statuses.push(status);
        }
    }
    statuses
}

#[tokio::test]
async fn test_manifest_is_handed_to_capture() {
    let harness = Harness::new(stream_page(vec![], true), WRITE_AND_EXIT, |_| {});
    let mut events = harness.controller.subscribe();

    let session = harness.controller.record(STREAM_URL, options()).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Completed);
    assert_eq!(session.attempt, 1);
    assert!(!session.degraded);
    assert_eq!(session.manifest_url.as_deref(), Some(MANIFEST_URL));

    let args = harness.capture_args();
    assert_eq!(args.first().map(String::as_str), Some(MANIFEST_URL));
    assert!(args.iter().any(|a| a == "--cookies"));

    let final_path = session.final_path.expect("final path");
    assert!(final_path.starts_with(harness.path("videos")));
    assert!(final_path.file_name().unwrap().to_string_lossy().starts_with("alice_"));
    assert_eq!(std::fs::read_to_string(&final_path).unwrap().trim(), "segment");

    // The per-session cookie file does not outlive the capture.
    let cookie_file = harness.path("cookies").join(format!("capture_{}.txt", session.id));
    assert_eq!(session.cookie_file.as_deref(), Some(cookie_file.as_path()));
    assert!(!cookie_file.exists());

    assert_eq!(
        drain(&mut events),
        vec![
            RecordingStatus::BrowserStarting,
            RecordingStatus::Authenticating,
            RecordingStatus::WaitingForStream,
            RecordingStatus::Recording,
        ]
    );
    let log = harness.log.lock();
    assert_eq!(log.launches, log.sessions_closed);
    assert_eq!(log.pages_opened, log.pages_closed);
    assert!(log.clicks().is_empty());
    assert!(log.fills().is_empty());
}

#[tokio::test]
async fn test_channel_name_resolves_to_stream_page() {
    let harness = Harness::new(stream_page(vec![], false), WRITE_AND_HANG, |_| {});

    let id = harness.controller.start("alice", options()).unwrap();
    let session = harness.controller.session(id).unwrap();
    assert_eq!(session.target_url, STREAM_URL);
    assert!(harness.controller.is_recording("alice"));
    assert!(harness.controller.is_recording(STREAM_URL));
    assert!(matches!(
        harness.controller.start(STREAM_URL, options()),
        Err(Error::AlreadyRecording(_))
    ));

    harness.wait_for_status(id, RecordingStatus::Recording).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = harness.controller.stop_and_wait(id).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Stopped);
    assert_eq!(harness.capture_args().first().map(String::as_str), Some(STREAM_URL));
    let log = harness.log.lock();
    assert!(log.actions.contains(&PageAction::Goto(STREAM_URL.to_string())));
    assert!(!log.actions.contains(&PageAction::Goto("alice".to_string())));
}

#[tokio::test]
async fn test_degraded_mode_records_page_url() {
    let harness = Harness::new(stream_page(vec![], false), WRITE_AND_EXIT, |_| {});

    let session = harness.controller.record(STREAM_URL, options()).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Completed);
    assert!(session.degraded);
    assert!(session.manifest_url.is_none());
    assert_eq!(harness.capture_args().first().map(String::as_str), Some(STREAM_URL));
}

#[tokio::test]
async fn test_degraded_mode_can_be_refused() {
    let harness = Harness::new(stream_page(vec![], false), WRITE_AND_EXIT, |_| {});
    let options = RecordingOptions {
        allow_degraded: false,
        ..options()
    };

    let session = harness.controller.record(STREAM_URL, options).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Failed);
    assert!(session.last_error.unwrap().contains("manifest"));
    assert!(harness.capture_args().is_empty());
}

#[tokio::test]
async fn test_password_barrier_is_passed() {
    let input = Selector::css(r#"input[type="password"]"#);
    let harness = Harness::new(stream_page(vec![input.clone()], true), WRITE_AND_EXIT, |_| {});
    let mut events = harness.controller.subscribe();

    let session = harness
        .controller
        .record(STREAM_URL, options().with_password("letmein"))
        .await
        .unwrap();

    assert_eq!(session.status, RecordingStatus::Completed);
    assert!(drain(&mut events).contains(&RecordingStatus::WaitingForStream));
    let log = harness.log.lock();
    assert!(log.actions.contains(&PageAction::Fill(input.clone(), "letmein".into())));
    assert!(log.actions.contains(&PageAction::PressEnter(input)));
}

#[tokio::test]
async fn test_missing_password_fails_without_retry() {
    let input = Selector::css(r#"input[type="password"]"#);
    let harness = Harness::new(stream_page(vec![input], true), WRITE_AND_EXIT, |_| {});
    let options = RecordingOptions {
        max_retries: 3,
        ..options()
    };

    let session = harness.controller.record(STREAM_URL, options).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Failed);
    assert_eq!(session.attempt, 1);
    assert!(session.last_error.unwrap().to_lowercase().contains("password"));
    assert!(harness.capture_args().is_empty());
}

#[tokio::test]
async fn test_failing_capture_retries_with_backoff() {
    let harness = Harness::new(stream_page(vec![], true), FAIL, |_| {});
    let options = RecordingOptions {
        max_retries: 2,
        ..options()
    };

    let mut events = harness.controller.subscribe();
    let attempts = tokio::spawn(async move {
        let mut starts = Vec::new();
        while let Ok(event) = events.recv().await {
            match event {
                RecorderEvent::StatusChanged {
                    status: RecordingStatus::BrowserStarting,
                    ..
                } => starts.push(std::time::Instant::now()),
                RecorderEvent::Finished { .. } => break,
                _ => {}
            }
        }
        starts
    });

    let session = harness.controller.record(STREAM_URL, options).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Failed);
    assert_eq!(session.attempt, 3);
    assert!(session.last_error.unwrap().contains("stream offline"));

    // Backoff doubles from the base delay: 1s before the second attempt, 2s before the third.
    let starts = attempts.await.unwrap();
    assert_eq!(starts.len(), 3);
    let first_gap = starts[1] - starts[0];
    let second_gap = starts[2] - starts[1];
    assert!(first_gap >= Duration::from_secs(1) && first_gap < Duration::from_millis(1900), "{first_gap:?}");
    assert!(second_gap >= Duration::from_secs(2) && second_gap < Duration::from_millis(2900), "{second_gap:?}");
    assert_eq!(harness.controller.statistics().failed, 1);
    assert_eq!(harness.log.lock().launches, 3);
}

#[tokio::test]
async fn test_stop_during_recording_keeps_partial_file() {
    let harness = Harness::new(stream_page(vec![], true), WRITE_AND_HANG, |_| {});

    let id = harness.controller.start(STREAM_URL, options()).unwrap();
    harness.wait_for_status(id, RecordingStatus::Recording).await;
    // Give the tool time to write its output and pid.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let session = harness.controller.stop_and_wait(id).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Stopped);
    let partial = session.final_path.expect("partial recording kept");
    assert!(partial.starts_with(harness.path("videos")));
    assert!(partial.exists());

    let pid = std::fs::read_to_string(harness.path("pid.txt")).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "capture process still running");

    assert!(!harness.controller.is_recording(STREAM_URL));
    assert_eq!(harness.controller.statistics().stopped, 1);
}

#[tokio::test]
async fn test_start_rejections() {
    let harness = Harness::new(stream_page(vec![], true), WRITE_AND_HANG, |config| {
        config.max_concurrent_recordings = 1;
    });

    let unconfirmed = RecordingOptions {
        confirmed_by_user: false,
        ..options()
    };
    assert!(matches!(
        harness.controller.start(STREAM_URL, unconfirmed),
        Err(Error::ConfirmationRequired(_))
    ));
    assert!(harness.controller.active_sessions().is_empty());

    let id = harness.controller.start(STREAM_URL, options()).unwrap();
    assert!(matches!(
        harness.controller.start(STREAM_URL, options()),
        Err(Error::AlreadyRecording(_))
    ));
    assert!(matches!(
        harness.controller.start(OTHER_URL, options()),
        Err(Error::ConcurrencyLimit(1))
    ));
    assert_eq!(harness.controller.active_sessions().len(), 1);

    harness.wait_for_status(id, RecordingStatus::Recording).await;
    harness.controller.shutdown().await;

    let session = harness.controller.session(id).unwrap();
    assert_eq!(session.status, RecordingStatus::Stopped);
    assert!(harness.controller.active_sessions().is_empty());
}

#[tokio::test]
async fn test_browser_launch_failure_is_retried() {
    let harness = Harness::new(stream_page(vec![], true), WRITE_AND_EXIT, |_| {});
    let options = RecordingOptions {
        max_retries: 1,
        ..options()
    };
    // Launch failures are infrastructure errors: retried, then ERROR.
    let failing = FakeBackend::new(stream_page(vec![], true)).fail_launches(5);
    let config = harness.controller.config().clone();
    let controller = RecordingSessionController::builder(config, Arc::new(failing))
        .build()
        .unwrap();

    let session = controller.record(STREAM_URL, options).await.unwrap();

    assert_eq!(session.status, RecordingStatus::Error);
    assert_eq!(session.attempt, 2);
    assert!(session.last_error.unwrap().contains("launch"));
}
