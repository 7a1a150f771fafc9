use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use crate::error::ViewError;

static NON_LETTERS: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^a-z]").expect("valid regex"));
static NON_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^0-9]").expect("valid regex"));

/// Kind of catalog item a view is recorded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Tv,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Movie, ContentType::Tv];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Tv => "tv",
        }
    }

    /// Lowercase ASCII letters and drop everything outside `[a-z]` before matching.
    /// Non-ASCII letters are never folded, so `İ` is stripped rather than read as `i`.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let lowered = raw.to_ascii_lowercase();
        match NON_LETTERS.replace_all(&lowered, "").as_ref() {
            "movie" => Some(ContentType::Movie),
            "tv" => Some(ContentType::Tv),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite counter key, persisted as `"<type>_<id>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub content_type: ContentType,
    /// Non-empty string of ASCII digits
    pub content_id: String,
}

impl ContentKey {
    /// Build a key from untrusted request values
    pub fn sanitize(raw_type: &str, raw_id: &str) -> Result<Self, ViewError> {
        let content_type = ContentType::sanitize(raw_type).ok_or(ViewError::InvalidArgument)?;
        let content_id = NON_DIGITS.replace_all(raw_id, "").into_owned();
        if content_id.is_empty() {
            return Err(ViewError::InvalidArgument);
        }

        Ok(Self {
            content_type,
            content_id,
        })
    }

    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.content_type, self.content_id)
    }

    /// Parse a persisted key. Anything that is not `movie_<digits>` or `tv_<digits>` is rejected.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let (prefix, id) = key.split_once('_')?;
        let content_type = match prefix {
            "movie" => ContentType::Movie,
            "tv" => ContentType::Tv,
            _ => return None,
        };
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            content_type,
            content_id: id.to_string(),
        })
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.content_type, self.content_id)
    }
}

/// Numeric ordering of digit strings without parsing them.
/// Leading zeros are ignored for the comparison and only break exact ties.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let trimmed_a = a.trim_start_matches('0');
    let trimmed_b = b.trim_start_matches('0');
    trimmed_a
        .len()
        .cmp(&trimmed_b.len())
        .then_with(|| trimmed_a.cmp(trimmed_b))
        .then_with(|| a.cmp(b))
}

/// Leaderboard order: views descending, then id ascending
pub fn rank(a: &(ContentKey, u64), b: &(ContentKey, u64)) -> Ordering {
    b.1.cmp(&a.1)
        .then_with(|| compare_ids(&a.0.content_id, &b.0.content_id))
}
