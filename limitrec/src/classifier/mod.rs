//! Advisory stream URL classification.
//!
//! Classification only looks at the URL shape. Restrictions derived here are
//! hints for logging and confirmation prompts; the barrier navigator handles
//! whatever the page actually shows.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::{Error, Result};

static USER_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid user segment regex"));
static COMMUNITY_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^c:[A-Za-z0-9_:]+$").expect("valid community segment regex"));
static GROUP_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^g:[0-9]+$").expect("valid group segment regex"));
static MOVIE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("valid movie id regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    Standard,
    Community,
    Group,
    /// An archived video rather than a live channel.
    Movie,
    Unknown,
}

/// Access restrictions a stream may have. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamRestrictions {
    pub age_restricted: bool,
    pub password_required: bool,
    pub group_only: bool,
    pub follower_only: bool,
    pub private: bool,
}

impl StreamRestrictions {
    pub fn has_any(&self) -> bool {
        self.age_restricted || self.password_required || self.group_only || self.follower_only || self.private
    }
}

impl fmt::Display for StreamRestrictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = [
            (self.age_restricted, "age restricted"),
            (self.password_required, "password"),
            (self.group_only, "group only"),
            (self.follower_only, "followers only"),
            (self.private, "private"),
        ]
        .into_iter()
        .filter_map(|(set, label)| set.then_some(label))
        .collect();

        if labels.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&labels.join(" + "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlClassification {
    pub input: String,
    pub normalized_url: String,
    pub channel: Option<String>,
    pub kind: StreamKind,
    pub restrictions: StreamRestrictions,
    /// Why the URL cannot be recorded live, if it cannot.
    pub error: Option<String>,
}

impl UrlClassification {
    pub fn is_recordable(&self) -> bool {
        self.error.is_none()
    }

    /// Channel name for file names and logs, falling back to the last path segment.
    pub fn channel_or_fallback(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| channel_from_url(&self.normalized_url))
    }
}

#[derive(Debug, Clone)]
pub struct UrlClassifier {
    base: Url,
    host: String,
}

impl UrlClassifier {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| Error::config(format!("site_base_url: {e}")))?;
        let host = base
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
            .ok_or_else(|| Error::config("site_base_url has no host"))?;
        Ok(Self { base, host })
    }

    pub fn classify(&self, input: &str) -> UrlClassification {
        let trimmed = input.trim();
        let unknown = |normalized: String, error: &str| UrlClassification {
            input: input.to_string(),
            normalized_url: normalized,
            channel: None,
            kind: StreamKind::Unknown,
            restrictions: StreamRestrictions::default(),
            error: Some(error.to_string()),
        };

        let Some(url) = self.absolutize(trimmed) else {
            return unknown(trimmed.to_string(), "not a valid URL");
        };
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_ascii_lowercase());
        if host.as_deref() != Some(self.host.as_str()) {
            return unknown(url.to_string(), "URL is not on the configured site");
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let mut restrictions = StreamRestrictions::default();
        let (kind, channel, path, error) = match segments.as_slice() {
            [group] | [group, "broadcaster"] if GROUP_SEGMENT.is_match(group) => {
                restrictions.group_only = true;
                (StreamKind::Group, *group, group.to_string(), None)
            }
            [user, "movie", id] if is_channel(user) && MOVIE_ID.is_match(id) => (
                StreamKind::Movie,
                *user,
                format!("{user}/movie/{id}"),
                Some("archived video URL, use the live channel URL"),
            ),
            [community] if COMMUNITY_SEGMENT.is_match(community) => {
                restrictions.age_restricted = true;
                (StreamKind::Community, *community, community.to_string(), None)
            }
            [user] if USER_SEGMENT.is_match(user) => (StreamKind::Standard, *user, user.to_string(), None),
            _ => return unknown(url.to_string(), "unrecognized stream URL"),
        };

        let normalized_url = self.page_url(&path).to_string();

        UrlClassification {
            input: input.to_string(),
            normalized_url,
            channel: Some(channel.to_string()),
            kind,
            restrictions,
            error: error.map(str::to_string),
        }
    }

    fn absolutize(&self, input: &str) -> Option<Url> {
        if input.is_empty() {
            return None;
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            return Url::parse(input).ok();
        }
        if input.to_ascii_lowercase().starts_with(&self.host) || input.starts_with("www.") {
            return Url::parse(&format!("https://{input}")).ok();
        }
        // A leading `./` keeps segments like `c:fans` from parsing as a scheme.
        self.base
            .join(&format!("./{}", input.trim_start_matches('/')))
            .ok()
    }

    fn page_url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("/{path}"));
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

fn is_channel(segment: &str) -> bool {
    USER_SEGMENT.is_match(segment) || COMMUNITY_SEGMENT.is_match(segment)
}

/// Last non-empty path segment of `url`, or `unknown`.
pub fn channel_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(|s| s.replace(':', "_")))
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> UrlClassifier {
        UrlClassifier::new("https://twitcasting.tv").unwrap()
    }

    #[test]
    fn test_standard() {
        let c = classifier().classify("https://twitcasting.tv/alice_01/");
        assert_eq!(c.kind, StreamKind::Standard);
        assert_eq!(c.channel.as_deref(), Some("alice_01"));
        assert_eq!(c.normalized_url, "https://twitcasting.tv/alice_01");
        assert!(!c.restrictions.has_any());
        assert!(c.is_recordable());
    }

    #[test]
    fn test_bare_name_and_host_inputs() {
        let c = classifier().classify("alice");
        assert_eq!(c.normalized_url, "https://twitcasting.tv/alice");
        let c = classifier().classify("www.twitcasting.tv/bob?ref=x");
        assert_eq!(c.kind, StreamKind::Standard);
        assert_eq!(c.channel.as_deref(), Some("bob"));
    }

    #[test]
    fn test_community_and_group_hints() {
        let c = classifier().classify("https://twitcasting.tv/c:fanclub");
        assert_eq!(c.kind, StreamKind::Community);
        assert!(c.restrictions.age_restricted);
        assert_eq!(c.normalized_url, "https://twitcasting.tv/c:fanclub");

        let g = classifier().classify("https://twitcasting.tv/g:12345/broadcaster");
        assert_eq!(g.kind, StreamKind::Group);
        assert!(g.restrictions.group_only);
        assert_eq!(g.normalized_url, "https://twitcasting.tv/g:12345");
        assert_eq!(g.restrictions.to_string(), "group only");
    }

    #[test]
    fn test_bare_prefixed_segments_stay_on_site() {
        let g = classifier().classify("g:12345");
        assert_eq!(g.kind, StreamKind::Group);
        assert_eq!(g.normalized_url, "https://twitcasting.tv/g:12345");

        let c = classifier().classify("/c:fanclub");
        assert_eq!(c.kind, StreamKind::Community);
        assert_eq!(c.normalized_url, "https://twitcasting.tv/c:fanclub");
    }

    #[test]
    fn test_movie_is_not_recordable() {
        let c = classifier().classify("https://twitcasting.tv/alice/movie/98765");
        assert_eq!(c.kind, StreamKind::Movie);
        assert!(!c.is_recordable());
    }

    #[test]
    fn test_foreign_host_is_unknown() {
        let c = classifier().classify("https://example.com/alice");
        assert_eq!(c.kind, StreamKind::Unknown);
        assert!(c.error.is_some());
        assert_eq!(c.channel_or_fallback(), "alice");
    }

    #[test]
    fn test_channel_from_url() {
        assert_eq!(channel_from_url("https://x.test/alice/?a=1"), "alice");
        assert_eq!(channel_from_url("https://x.test/c:fans"), "c_fans");
        assert_eq!(channel_from_url(""), "unknown");
    }
}
