//! feedline-fetch: pagination-safe collection from a time-ordered feed
//!
//! [`WindowFetcher`] walks a newest-first feed from a resume cursor back to a
//! fixed cutoff, persisting deduplicated posts and checkpointing the cursor
//! after every page. It stops when the window is exhausted, the feed runs
//! dry, or one of the safety limits trips; limits never fail the invocation.

pub mod error;
pub mod feed;
pub mod http_feed;
mod prefetch;
pub mod sink;
pub mod window;

pub use error::{FeedError, FetchError};
pub use feed::{Feed, FeedItem, FeedPage, StaticFeed, parse_created_at};
pub use http_feed::{HttpFeed, HttpFeedConfig};
pub use sink::{SinkError, StoreSink, WindowSink};
pub use window::{FetchLimits, FetchOutcome, StopReason, WindowFetcher};
