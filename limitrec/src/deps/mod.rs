//! External tool availability checks.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;
use crate::{Error, Result};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

const CHROMIUM_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

/// Availability of one external dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    pub name: &'static str,
    pub program: String,
    pub required: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl DependencyStatus {
    pub fn is_available(&self) -> bool {
        self.version.is_some()
    }

    fn from_probe(name: &'static str, program: String, required: bool, probe: std::result::Result<String, String>) -> Self {
        let (version, error) = match probe {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            name,
            program,
            required,
            version,
            error,
        }
    }
}

/// Run `<program> <version_arg>` and return the first line of its output.
pub async fn probe_version(program: &str, version_arg: &str, timeout: Duration) -> std::result::Result<String, String> {
    let mut cmd = process_utils::tokio_command(program);
    cmd.arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err(format!("no response within {}s", timeout.as_secs())),
    };
    if !output.status.success() {
        return Err(format!("exited with {}", output.status));
    }

    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "empty version output".to_string())
}

/// Check that a WebDriver endpoint accepts TCP connections.
pub async fn probe_webdriver(endpoint: &str, timeout: Duration) -> std::result::Result<String, String> {
    let url = Url::parse(endpoint).map_err(|e| e.to_string())?;
    let host = url.host_str().ok_or("endpoint has no host")?.to_string();
    let port = url.port_or_known_default().ok_or("endpoint has no port")?;

    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_)) => Ok(format!("listening on {host}:{port}")),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no response within {}s", timeout.as_secs())),
    }
}

async fn probe_chromium(configured: Option<&PathBuf>) -> DependencyStatus {
    if let Some(path) = configured {
        let program = path.to_string_lossy().into_owned();
        let probe = probe_version(&program, "--version", PROBE_TIMEOUT).await;
        return DependencyStatus::from_probe("chromium", program, false, probe);
    }

    let mut last_error = String::from("not found");
    for candidate in CHROMIUM_CANDIDATES {
        match probe_version(candidate, "--version", PROBE_TIMEOUT).await {
            Ok(version) => {
                return DependencyStatus::from_probe("chromium", candidate.to_string(), false, Ok(version));
            }
            Err(e) => {
                debug!(candidate, error = %e, "Chromium candidate unavailable");
                last_error = e;
            }
        }
    }
    DependencyStatus::from_probe("chromium", CHROMIUM_CANDIDATES.join(" | "), false, Err(last_error))
}

/// Probe every external dependency the recorder uses.
pub async fn probe_all(config: &AppConfig) -> Vec<DependencyStatus> {
    let capture = probe_version(&config.capture_binary, "--version", PROBE_TIMEOUT);
    let ffmpeg = probe_version("ffmpeg", "-version", PROBE_TIMEOUT);
    let chromium = probe_chromium(config.chrome_executable.as_ref());
    let (capture, ffmpeg, chromium) = tokio::join!(capture, ffmpeg, chromium);

    let mut statuses = vec![
        DependencyStatus::from_probe("capture", config.capture_binary.clone(), true, capture),
        DependencyStatus::from_probe("ffmpeg", "ffmpeg".to_string(), true, ffmpeg),
        chromium,
    ];

    if let Some(endpoint) = &config.webdriver_url {
        let probe = probe_webdriver(endpoint, PROBE_TIMEOUT).await;
        statuses.push(DependencyStatus::from_probe("webdriver", endpoint.clone(), false, probe));
    }

    for status in &statuses {
        if !status.is_available() {
            let error = status.error.as_deref().unwrap_or_default();
            if status.required {
                warn!(dependency = status.name, program = %status.program, error, "Required dependency unavailable");
            } else {
                debug!(dependency = status.name, program = %status.program, error, "Optional dependency unavailable");
            }
        }
    }
    statuses
}

/// Fail when the configured capture tool cannot be run.
pub async fn ensure_capture_tool(config: &AppConfig) -> Result<String> {
    probe_version(&config.capture_binary, "--version", PROBE_TIMEOUT)
        .await
        .map_err(|e| Error::Dependency(format!("{}: {e}", config.capture_binary)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn tool(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("tool.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_probe_version_first_line() {
        let tmp = TempDir::new().unwrap();
        let program = tool(&tmp, "echo\necho '2025.01.15'\necho extra");
        assert_eq!(
            probe_version(&program, "--version", PROBE_TIMEOUT).await.unwrap(),
            "2025.01.15"
        );
    }

    #[tokio::test]
    async fn test_probe_version_failures() {
        let tmp = TempDir::new().unwrap();
        let failing = tool(&tmp, "exit 3");
        assert!(probe_version(&failing, "--version", PROBE_TIMEOUT).await.is_err());

        let missing = tmp.path().join("nope").to_string_lossy().into_owned();
        assert!(probe_version(&missing, "--version", PROBE_TIMEOUT).await.is_err());
    }

    #[tokio::test]
    async fn test_probe_version_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let slow = tool(&tmp, "exec sleep 30");
        let err = probe_version(&slow, "--version", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.contains("no response"));
    }

    #[tokio::test]
    async fn test_ensure_capture_tool() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig {
            capture_binary: tmp.path().join("missing").to_string_lossy().into_owned(),
            ..Default::default()
        };
        assert!(matches!(
            ensure_capture_tool(&config).await,
            Err(Error::Dependency(_))
        ));
    }

    #[tokio::test]
    async fn test_webdriver_probe_rejects_bad_endpoint() {
        assert!(probe_webdriver("not a url", Duration::from_secs(1)).await.is_err());
    }
}
