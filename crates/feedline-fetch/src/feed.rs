//! Feed abstraction and an in-memory implementation

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use feedline_store::{Engagement, Post};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// A raw feed item. `created_at` is kept as the feed sent it; items whose
/// timestamp cannot be parsed are skipped by the fetch loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub uri: String,
    pub created_at: String,
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub engagement: Engagement,
}

impl FeedItem {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_created_at(&self.created_at)
    }

    pub fn to_post(&self) -> Option<Post> {
        Some(Post {
            uri: self.uri.clone(),
            created_at: self.created_at()?,
            author: self.author.clone(),
            text: self.text.clone(),
            engagement: self.engagement,
        })
    }
}

/// Parse an item timestamp: RFC 3339, or a zone-less ISO timestamp taken as
/// UTC.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

/// One page of a newest-first feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl FeedPage {
    /// Oldest parsable timestamp on the page.
    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.items.iter().filter_map(FeedItem::created_at).min()
    }

    /// Whether walking past this page would leave the window.
    pub fn reaches(&self, cutoff: DateTime<Utc>) -> bool {
        self.oldest().is_some_and(|t| t < cutoff)
    }

    /// Cursor to continue from, if the feed offers one.
    pub fn continuation(&self) -> Option<&str> {
        if !self.has_more {
            return None;
        }
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// A paged, time-ordered (newest first) feed.
pub trait Feed: Send + Sync {
    fn fetch_page(
        &self,
        cursor: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<FeedPage, FeedError>;
}

/// Feed over a fixed item list, paginated by offset.
///
/// Used for offline runs and tests. Records every cursor it is asked for.
#[derive(Debug, Default)]
pub struct StaticFeed {
    items: Vec<FeedItem>,
    requests: Mutex<Vec<Option<String>>>,
}

impl StaticFeed {
    /// Items must already be newest first.
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of items.
    pub fn from_json_file(path: &Path) -> Result<Self, FeedError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedError::Decode(format!("{}: {e}", path.display())))?;
        let items: Vec<FeedItem> = serde_json::from_str(&content)
            .map_err(|e| FeedError::Decode(format!("{}: {e}", path.display())))?;
        Ok(Self::new(items))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cursors requested so far, in order.
    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Feed for StaticFeed {
    fn fetch_page(
        &self,
        cursor: Option<&str>,
        _since: DateTime<Utc>,
        limit: usize,
    ) -> Result<FeedPage, FeedError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cursor.map(String::from));

        let offset = match cursor {
            None | Some("") => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| FeedError::Decode(format!("unknown cursor {c:?}")))?,
        };
        let start = offset.min(self.items.len());
        let end = (start + limit.max(1)).min(self.items.len());
        let has_more = end < self.items.len();
        Ok(FeedPage {
            items: self.items[start..end].to_vec(),
            next_cursor: has_more.then(|| end.to_string()),
            has_more,
        })
    }
}
