//! Batched post storage
//!
//! Posts are stored in fixed-size batches keyed by
//! `(run_id, "batch" + zero-padded index)`. Indices are reserved through a
//! conditional write on the fetcher's run row before any batch is written,
//! so repeated fetch invocations append instead of overwriting.

use chrono::{DateTime, Utc};
use feedline_core::{Clock, RetryPolicy, retry_with_backoff};
use serde::{Deserialize, Serialize};

use crate::paging::query_all;
use crate::run_state::RunStateStore;
use crate::stage::Stage;
use crate::table::{NewRow, Precondition, PutOutcome, SharedTable};
use crate::{Result, StoreError};

/// Posts per batch row.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Sort-key prefix of batch rows.
pub const BATCH_PREFIX: &str = "batch";

/// Engagement counters reported by the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub quotes: u64,
}

impl Engagement {
    pub fn total(&self) -> u64 {
        self.likes + self.reposts + self.replies + self.quotes
    }
}

/// A collected feed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub uri: String,
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub engagement: Engagement,
}

/// One stored batch row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostBatch {
    pub run_id: String,
    pub index: u32,
    pub posts: Vec<Post>,
    pub created_at: DateTime<Utc>,
}

/// Sort key for batch `index`.
pub fn batch_key(index: u32) -> String {
    format!("{BATCH_PREFIX}{index:08}")
}

fn parse_batch_key(sk: &str) -> Option<u32> {
    sk.strip_prefix(BATCH_PREFIX)?.parse().ok()
}

/// Batched post store.
#[derive(Clone)]
pub struct PostStore {
    table: SharedTable,
    runs: RunStateStore,
    batch_size: usize,
    retry: RetryPolicy,
}

impl PostStore {
    pub fn new(table: SharedTable, runs: RunStateStore) -> Self {
        let retry = runs.retry_policy();
        Self {
            table,
            runs,
            batch_size: DEFAULT_BATCH_SIZE,
            retry,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append posts to the run.
    ///
    /// 1. read the fetcher row (created from its predecessor if needed),
    /// 2. reserve indices after the highest existing one in one conditional
    ///    write,
    /// 3. write the batches, refusing to replace an existing batch,
    /// 4. add the posts of the written batches to the cumulative count.
    ///
    /// A failed batch write leaves its reserved index unused. Batches
    /// written before it are still counted.
    ///
    /// Returns the number of posts stored.
    pub fn add_posts(&self, run_id: &str, posts: &[Post]) -> Result<usize> {
        if posts.is_empty() {
            return Ok(0);
        }
        let state = self.runs.advance(run_id, Stage::Fetcher)?;

        // Rows written before the index was tracked on the run row.
        let floor = match state.last_batch_index {
            Some(_) => None,
            None => self.highest_batch_index(run_id)?,
        };

        let chunks: Vec<&[Post]> = posts.chunks(self.batch_size).collect();
        let batches = u32::try_from(chunks.len())
            .map_err(|_| StoreError::Invalid(format!("too many batches: {}", chunks.len())))?;
        let first = self.runs.reserve_batches(run_id, batches, floor)?;

        let now = self.runs.clock().now();
        let mut stored = 0usize;
        for (offset, chunk) in (0u32..).zip(chunks) {
            let index = first + offset;
            if let Err(e) = self.write_batch(run_id, index, chunk, state.expires_at, now) {
                if stored > 0 {
                    self.runs.record_posts(run_id, stored as u64)?;
                }
                return Err(e);
            }
            stored += chunk.len();
        }
        self.runs.record_posts(run_id, stored as u64)?;

        log::debug!(
            "{run_id}: stored {} posts in {batches} batches starting at {first}",
            posts.len()
        );
        Ok(posts.len())
    }

    fn write_batch(
        &self,
        run_id: &str,
        index: u32,
        posts: &[Post],
        expires_at: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let batch = PostBatch {
            run_id: run_id.to_string(),
            index,
            posts: posts.to_vec(),
            created_at: now,
        };
        let row = NewRow::encode(run_id, batch_key(index), Some(expires_at), &batch)?;
        let outcome = retry_with_backoff(
            &format!("{run_id}/{}: put", batch_key(index)),
            &self.retry,
            || self.table.put(row.clone(), Precondition::DoesNotExist),
        )?;
        match outcome {
            PutOutcome::Written { .. } => Ok(()),
            PutOutcome::PreconditionFailed { .. } => Err(StoreError::Conflict(format!(
                "{run_id}: batch {index} already exists"
            ))),
        }
    }

    /// Every batch of the run, in index order.
    pub fn batches(&self, run_id: &str) -> Result<Vec<PostBatch>> {
        query_all(self.table.as_ref(), run_id, BATCH_PREFIX, self.retry)
            .map(|row| row.and_then(|r| r.decode::<PostBatch>()))
            .collect()
    }

    /// Every post of the run across all batches and pages.
    pub fn get_all_posts(&self, run_id: &str) -> Result<Vec<Post>> {
        let mut posts = Vec::new();
        for batch in self.batches(run_id)? {
            posts.extend(batch.posts);
        }
        Ok(posts)
    }

    pub fn batch_count(&self, run_id: &str) -> Result<usize> {
        let mut count = 0;
        for row in query_all(self.table.as_ref(), run_id, BATCH_PREFIX, self.retry) {
            row?;
            count += 1;
        }
        Ok(count)
    }

    /// Highest batch index present in storage.
    pub fn highest_batch_index(&self, run_id: &str) -> Result<Option<u32>> {
        let mut highest = None;
        for row in query_all(self.table.as_ref(), run_id, BATCH_PREFIX, self.retry) {
            let row = row?;
            match parse_batch_key(&row.sk) {
                Some(index) => highest = highest.max(Some(index)),
                None => log::warn!("{run_id}: ignoring unexpected key {}", row.sk),
            }
        }
        Ok(highest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTable;
    use crate::table::Table;
    use chrono::{Duration, TimeZone};
    use feedline_core::ManualClock;
    use std::sync::Arc;

    fn post(i: usize) -> Post {
        Post {
            uri: format!("at://did:example/post/{i}"),
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 11, 45, 0).unwrap(),
            author: format!("user{}", i % 7),
            text: format!("post number {i}"),
            engagement: Engagement::default(),
        }
    }

    fn posts(range: std::ops::Range<usize>) -> Vec<Post> {
        range.map(post).collect()
    }

    struct Fixture {
        runs: RunStateStore,
        posts: PostStore,
        table: Arc<MemoryTable>,
    }

    fn setup(page_limit: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let run_table = Arc::new(MemoryTable::new("run_state", clock.clone()));
        let post_table =
            Arc::new(MemoryTable::new("posts", clock.clone()).with_page_limit(page_limit));
        let runs = RunStateStore::new(run_table, clock).with_retry(RetryPolicy::immediate(2));
        let posts = PostStore::new(post_table.clone(), runs.clone());
        Fixture {
            runs,
            posts,
            table: post_table,
        }
    }

    #[test]
    fn repeated_invocations_append() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        f.posts.add_posts("run-1", &posts(0..100)).unwrap();
        f.posts.add_posts("run-1", &posts(100..200)).unwrap();
        f.posts.add_posts("run-1", &posts(200..300)).unwrap();

        let all = f.posts.get_all_posts("run-1").unwrap();
        assert_eq!(all.len(), 300);
        assert_eq!(f.posts.batch_count("run-1").unwrap(), 3);

        let state = f.runs.get_run("run-1", Stage::Fetcher).unwrap();
        assert_eq!(state.post_count, 300);
        assert_eq!(state.last_batch_index, Some(2));
    }

    #[test]
    fn fresh_store_handles_are_independent_of_process_state() {
        // Each invocation builds its own PostStore; nothing is remembered
        // in process memory between them.
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        for i in 0..3 {
            let store = PostStore::new(f.table.clone(), f.runs.clone());
            store.add_posts("run-1", &posts(i * 50..(i + 1) * 50)).unwrap();
        }
        assert_eq!(f.posts.get_all_posts("run-1").unwrap().len(), 150);
    }

    #[test]
    fn splits_into_fixed_size_batches() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        f.posts.add_posts("run-1", &posts(0..250)).unwrap();
        let batches = f.posts.batches("run-1").unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.posts.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        let indices: Vec<u32> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn reads_every_page() {
        // Two batch rows per page forces the reader through several pages.
        let f = setup(2);
        f.runs.create_run("run-1", 30).unwrap();
        let store = f.posts.clone().with_batch_size(10);
        store.add_posts("run-1", &posts(0..95)).unwrap();
        assert_eq!(store.batch_count("run-1").unwrap(), 10);
        assert_eq!(store.get_all_posts("run-1").unwrap().len(), 95);
    }

    #[test]
    fn untracked_existing_batches_are_not_overwritten() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        // A batch written without the run row knowing about it.
        let legacy = PostBatch {
            run_id: "run-1".into(),
            index: 4,
            posts: posts(0..3),
            created_at: Utc::now(),
        };
        f.table
            .put(
                NewRow::encode("run-1", batch_key(4), None, &legacy).unwrap(),
                Precondition::None,
            )
            .unwrap();

        f.posts.add_posts("run-1", &posts(10..20)).unwrap();
        let indices: Vec<u32> = f
            .posts
            .batches("run-1")
            .unwrap()
            .iter()
            .map(|b| b.index)
            .collect();
        assert_eq!(indices, vec![4, 5]);
        assert_eq!(f.posts.get_all_posts("run-1").unwrap().len(), 13);
    }

    #[test]
    fn empty_add_is_noop() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        assert_eq!(f.posts.add_posts("run-1", &[]).unwrap(), 0);
        assert!(f.runs.get_run("run-1", Stage::Fetcher).is_err());
    }

    #[test]
    fn refuses_after_fetch_stage_closed() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        f.posts.add_posts("run-1", &posts(0..5)).unwrap();
        f.runs.advance("run-1", Stage::Analyzer).unwrap();
        assert!(matches!(
            f.posts.add_posts("run-1", &posts(5..10)),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failed_batch_write_is_not_counted() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        f.posts.add_posts("run-1", &posts(0..1)).unwrap();

        // Exhausts the retries of the next batch put
        f.table.fail_next(3);
        assert!(f.posts.add_posts("run-1", &posts(1..10)).is_err());
        let state = f.runs.get_run("run-1", Stage::Fetcher).unwrap();
        assert_eq!(state.post_count, 1);

        // The next invocation refetches the same page
        f.posts.add_posts("run-1", &posts(1..10)).unwrap();
        let state = f.runs.get_run("run-1", Stage::Fetcher).unwrap();
        let stored = f.posts.get_all_posts("run-1").unwrap().len();
        assert_eq!(stored, 10);
        assert_eq!(state.post_count, stored as u64);
        // The failed reservation left a gap, not an overwrite
        assert_eq!(state.last_batch_index, Some(2));
        assert_eq!(f.posts.batch_count("run-1").unwrap(), 2);
    }

    #[test]
    fn partial_write_counts_written_batches() {
        let f = setup(100);
        f.runs.create_run("run-1", 30).unwrap();
        let store = f.posts.clone().with_batch_size(4);
        store.add_posts("run-1", &posts(0..1)).unwrap();

        // Occupy the second reserved index so that batch conflicts.
        let squatter = NewRow::encode("run-1", batch_key(2), None, &"x").unwrap();
        f.table.put(squatter, Precondition::None).unwrap();

        let result = store.add_posts("run-1", &posts(1..9));
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        let state = f.runs.get_run("run-1", Stage::Fetcher).unwrap();
        assert_eq!(state.post_count, 5);
    }

    #[test]
    fn batches_inherit_run_ttl() {
        let f = setup(100);
        let run = f.runs.create_run("run-1", 30).unwrap();
        f.posts.add_posts("run-1", &posts(0..1)).unwrap();
        let row = f.table.get("run-1", &batch_key(0)).unwrap().unwrap();
        assert_eq!(row.expires_at, Some(run.expires_at));
        assert!(run.expires_at > run.created_at.timestamp() + Duration::days(1).num_seconds());
    }

    #[test]
    fn batch_key_roundtrip() {
        assert_eq!(batch_key(42), "batch00000042");
        assert_eq!(parse_batch_key("batch00000042"), Some(42));
        assert_eq!(parse_batch_key("observation"), None);
    }

    #[test]
    fn engagement_total() {
        let e = Engagement {
            likes: 3,
            reposts: 2,
            replies: 1,
            quotes: 1,
        };
        assert_eq!(e.total(), 7);
    }
}
