use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of every canonical video identifier
pub const VIDEO_ID_LEN: usize = 11;

// Last recognized prefix wins because of the greedy leading `.*`.
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*(youtu\.be/|v/|u/\w/|embed/|shorts/|live/|watch\?v=|&v=)([^#&?]*).*")
        .expect("valid video url pattern")
});

static BARE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid bare id pattern")
});

/// Canonical video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a recognized video url or identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

impl VideoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifiers received from other viewers are trusted as-is.
    pub(crate) fn from_wire(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl FromStr for VideoId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if BARE_ID_PATTERN.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidIdentifier(s.to_string()))
        }
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check if a URL is a YouTube URL
pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com/watch")
        || url.contains("youtu.be/")
        || url.contains("youtube.com/embed/")
        || url.contains("youtube.com/shorts/")
        || url.contains("youtube.com/live/")
}

/// Extract the video id from a short-link, embed, watch-query url or a bare id.
///
/// A captured id that is not exactly [`VIDEO_ID_LEN`] characters long counts
/// as no match.
pub fn extract_video_id(url: &str) -> Option<VideoId> {
    if let Some(caps) = URL_PATTERN.captures(url) {
        if let Some(id) = caps.get(2) {
            if id.as_str().chars().count() == VIDEO_ID_LEN {
                return Some(VideoId(id.as_str().to_string()));
            }
        }
    }

    url.parse().ok()
}

/// Canonical watch url for an id
pub fn watch_url(id: &VideoId) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}
