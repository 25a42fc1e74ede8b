//! Search-posts HTTP feed client
//!
//! Speaks a `searchPosts`-style endpoint:
//! `GET {base}/xrpc/app.bsky.feed.searchPosts?q=..&sort=latest&since=..&limit=..&cursor=..`
//! returning `{"posts": [...], "cursor": "..."}`. The cursor is absent on
//! the last page.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use feedline_core::{HttpError, block_on_with_timeout, http_client, parse_retry_after};
use feedline_store::Engagement;
use serde::Deserialize;

use crate::error::FeedError;
use crate::feed::{Feed, FeedItem, FeedPage};

const SEARCH_PATH: &str = "/xrpc/app.bsky.feed.searchPosts";

/// Longest error body kept in messages.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    pub base_url: String,
    pub query: String,
    /// Bearer token; requests are anonymous without one.
    pub token: Option<String>,
    pub timeout: Duration,
}

/// [`Feed`] over HTTP using the shared client and runtime.
pub struct HttpFeed {
    config: HttpFeedConfig,
}

impl HttpFeed {
    pub fn new(config: HttpFeedConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> String {
        format!("{}{SEARCH_PATH}", self.config.base_url.trim_end_matches('/'))
    }
}

impl Feed for HttpFeed {
    fn fetch_page(
        &self,
        cursor: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<FeedPage, FeedError> {
        let mut params = vec![
            ("q", self.config.query.clone()),
            ("sort", "latest".to_string()),
            ("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let url = self.url();
        let body = block_on_with_timeout(self.config.timeout, async {
            let mut request = http_client().get(&url).query(&params);
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(HttpError::from_reqwest)?;
            let status = response.status();
            if !status.is_success() {
                let retry_after = parse_retry_after(response.headers());
                let mut message = response.text().await.unwrap_or_default();
                truncate_at_char_boundary(&mut message, MAX_ERROR_BODY);
                return Err(HttpError::Status {
                    status: status.as_u16(),
                    message,
                    retry_after,
                });
            }
            response.text().await.map_err(HttpError::from_reqwest)
        })
        .map_err(|e| classify(e, cursor.is_some()))?;

        parse_search_response(&body)
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}

/// Map an HTTP failure onto the feed's error classes. A 400 on a request
/// that carried a cursor is the feed refusing to page any deeper.
fn classify(e: HttpError, had_cursor: bool) -> FeedError {
    match e {
        HttpError::Status {
            status: 400,
            message,
            ..
        } if had_cursor => FeedError::PaginationLimit(message),
        other => FeedError::from(other),
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    posts: Vec<WirePost>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePost {
    uri: String,
    author: WireAuthor,
    #[serde(default)]
    record: WireRecord,
    #[serde(default)]
    indexed_at: Option<String>,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    repost_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    quote_count: u64,
}

#[derive(Debug, Deserialize)]
struct WireAuthor {
    handle: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<WirePost> for FeedItem {
    fn from(post: WirePost) -> Self {
        FeedItem {
            uri: post.uri,
            // Fall back to the index time; empty strings are skipped later.
            created_at: post
                .record
                .created_at
                .or(post.indexed_at)
                .unwrap_or_default(),
            author: post.author.handle,
            text: post.record.text,
            engagement: Engagement {
                likes: post.like_count,
                reposts: post.repost_count,
                replies: post.reply_count,
                quotes: post.quote_count,
            },
        }
    }
}

/// Decode one search response body.
pub fn parse_search_response(body: &str) -> Result<FeedPage, FeedError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| FeedError::Decode(e.to_string()))?;
    let next_cursor = response.cursor.filter(|c| !c.is_empty());
    Ok(FeedPage {
        has_more: next_cursor.is_some(),
        next_cursor,
        items: response.posts.into_iter().map(FeedItem::from).collect(),
    })
}
