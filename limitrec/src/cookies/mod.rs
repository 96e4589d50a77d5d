//! Cookie snapshots and the Netscape cookie file format.
//!
//! A [`CookieSnapshot`] is the point-in-time cookie jar of a browsing context.
//! It is persisted in two forms:
//! - a structured JSON cache (reused across runs by the credential session)
//! - the tab-separated Netscape file consumed by the capture tool
//!
//! Netscape line layout:
//! `domain \t TRUE|FALSE (domain starts with '.') \t path \t TRUE|FALSE (secure) \t expiry \t name \t value`

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::fs;
use crate::{Error, Result};

/// Header written at the top of every Netscape cookie file.
pub const NETSCAPE_HEADER: &str =
    "# Netscape HTTP Cookie File\n# https://curl.se/docs/http-cookies.html\n# Generated by limitrec. Do not edit.\n\n";

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// A single browser cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    /// Expiry as epoch seconds, 0 for session cookies.
    #[serde(default)]
    pub expires: i64,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub http_only: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(domain: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            path: default_path(),
            secure: false,
            expires: 0,
            name: name.into(),
            value: value.into(),
            http_only: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the expiry. Negative values (browser session markers) become 0.
    pub fn with_expires(mut self, expires: i64) -> Self {
        self.expires = expires.max(0);
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Whether this cookie can be written as a Netscape line.
    pub fn is_well_formed(&self) -> bool {
        let clean = |s: &str| !s.contains(['\t', '\n', '\r']);
        !self.name.is_empty()
            && !self.value.is_empty()
            && !self.domain.is_empty()
            && clean(&self.name)
            && clean(&self.value)
            && clean(&self.domain)
            && clean(&self.path)
    }

    /// Whether the cookie would be sent to `host`.
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let host = host.trim_start_matches('.').to_ascii_lowercase();
        domain == host
            || host.ends_with(&format!(".{domain}"))
            || domain.ends_with(&format!(".{host}"))
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.domain == other.domain && self.path == other.path && self.name == other.name
    }

    fn to_netscape_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.domain.starts_with('.')),
            self.path,
            flag(self.secure),
            self.expires.max(0),
            self.name,
            self.value
        )
    }
}

fn flag(b: bool) -> &'static str {
    if b { "TRUE" } else { "FALSE" }
}

/// Ordered cookie jar captured at a specific moment.
///
/// `(domain, path, name)` is unique within a snapshot; inserting a cookie
/// for an existing slot replaces its value in place and keeps the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieSnapshot {
    cookies: Vec<Cookie>,
    captured_at: DateTime<Utc>,
}

impl Default for CookieSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieSnapshot {
    pub fn new() -> Self {
        Self {
            cookies: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn from_cookies(cookies: impl IntoIterator<Item = Cookie>) -> Self {
        let mut snapshot = Self::new();
        for cookie in cookies {
            snapshot.insert(cookie);
        }
        snapshot
    }

    pub fn insert(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.same_slot(&cookie)) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Overlay `newer` on top of this snapshot.
    pub fn merge(&mut self, newer: &CookieSnapshot) {
        for cookie in &newer.cookies {
            self.insert(cookie.clone());
        }
        self.captured_at = self.captured_at.max(newer.captured_at);
    }

    /// Keep only cookies that would be sent to `host`.
    pub fn retain_host(&mut self, host: &str) {
        self.cookies.retain(|c| c.matches_host(host));
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }
}

/// Render cookies as a Netscape cookie file. Malformed cookies are skipped.
pub fn serialize(cookies: &[Cookie]) -> String {
    let mut out = String::from(NETSCAPE_HEADER);
    for cookie in cookies {
        if !cookie.is_well_formed() {
            debug!(name = %cookie.name, domain = %cookie.domain, "Skipping malformed cookie");
            continue;
        }
        out.push_str(&cookie.to_netscape_line());
        out.push('\n');
    }
    out
}

/// Parse a Netscape cookie file. Comments, blank lines and malformed lines are skipped.
pub fn parse(text: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.splitn(7, '\t').collect();
        let [domain, _wildcard, path, secure, expires, name, value] = fields[..] else {
            continue;
        };
        if name.is_empty() || value.is_empty() {
            continue;
        }

        cookies.push(Cookie {
            domain: domain.to_string(),
            path: path.to_string(),
            secure: secure.eq_ignore_ascii_case("TRUE"),
            expires: expires.trim().parse::<i64>().unwrap_or(0).max(0),
            name: name.to_string(),
            value: value.to_string(),
            http_only,
        });
    }
    cookies
}

/// Convert a raw `name=value; name=value` header into a Netscape cookie file.
pub fn from_header_string(header: &str, domain: &str) -> String {
    let cookies: Vec<Cookie> = header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() || value.is_empty() {
                return None;
            }
            Some(Cookie::new(domain, name, value))
        })
        .collect();
    serialize(&cookies)
}

/// Render cookies as a `Cookie` request header value.
pub fn to_header_string(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .filter(|c| !c.name.is_empty())
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Atomically write `contents` to `path` (temp file in the same directory, then rename).
async fn write_atomic(path: &Path, contents: String, op: &'static str) -> Result<()> {
    fs::ensure_parent_dir_with_op("creating cookie directory", path).await?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;

        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| fs::io_error(op, &dir, e))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| fs::io_error(op, tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| fs::io_error(op, &target, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Other(format!("cookie writer task failed: {e}")))?
}

/// Persist cookies as a Netscape cookie file.
pub async fn persist(cookies: &[Cookie], path: &Path) -> Result<()> {
    write_atomic(path, serialize(cookies), "writing cookie file").await?;
    debug!(path = %path.display(), count = cookies.len(), "Persisted cookie file");
    Ok(())
}

/// Persist a snapshot as structured JSON.
pub async fn save_json(snapshot: &CookieSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    write_atomic(path, json, "writing cookie cache").await
}

/// Load a snapshot written by [`save_json`].
pub async fn load_json(path: &Path) -> Result<CookieSnapshot> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| fs::io_error("reading cookie cache", path, e))?;
    Ok(serde_json::from_str(&text)?)
}
