//! Where a window fetch puts its posts and cursor

use feedline_store::{Post, PostStore, RunStateStore};

/// Boxed error from a sink implementation.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Receives posts and cursor checkpoints from the fetch loop.
///
/// `checkpoint` is called after every page, after that page's posts were
/// persisted. `None` clears the cursor.
pub trait WindowSink {
    fn persist(&mut self, posts: &[Post]) -> Result<(), SinkError>;

    fn checkpoint(&mut self, cursor: Option<&str>, has_more: bool) -> Result<(), SinkError>;
}

/// Sink backed by the post store and the fetcher's run row.
pub struct StoreSink<'a> {
    posts: &'a PostStore,
    runs: &'a RunStateStore,
    run_id: &'a str,
}

impl<'a> StoreSink<'a> {
    pub fn new(posts: &'a PostStore, runs: &'a RunStateStore, run_id: &'a str) -> Self {
        Self {
            posts,
            runs,
            run_id,
        }
    }
}

impl WindowSink for StoreSink<'_> {
    fn persist(&mut self, posts: &[Post]) -> Result<(), SinkError> {
        self.posts.add_posts(self.run_id, posts)?;
        Ok(())
    }

    fn checkpoint(&mut self, cursor: Option<&str>, has_more: bool) -> Result<(), SinkError> {
        self.runs
            .update_cursor(self.run_id, cursor.unwrap_or(""), has_more)?;
        Ok(())
    }
}
