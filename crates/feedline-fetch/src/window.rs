//! The window fetch loop
//!
//! Per page:
//! 1. request the page for `(cursor, cutoff)`, retrying transient errors
//! 2. convert items, skipping unparsable timestamps and items older than the
//!    cutoff, and drop URIs already seen in this invocation
//! 3. persist the remainder
//! 4. stop if the oldest item predates the cutoff or the feed has no next
//!    page; otherwise checkpoint the next cursor
//! 5. before the next request, stop if the iteration cap trips or the request
//!    could still be running when the time budget runs out
//!
//! Pages come either straight from the feed or from a prefetch thread that
//! walks the cursor chain ahead of this loop. Either way this loop alone
//! owns the dedup set, the totals and the stop decision.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedline_core::{RetryPolicy, SharedClock, retry_with_backoff, shutdown_flag};
use rustc_hash::FxHashSet;

use crate::error::{FeedError, FetchError};
use crate::feed::{Feed, FeedPage};
use crate::prefetch;
use crate::sink::WindowSink;

/// Safety limits and sizing for one fetch invocation.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    /// Items requested per page.
    pub page_size: usize,
    /// Hard cap on pages per invocation.
    pub max_iterations: usize,
    /// Execution budget of the invocation.
    pub time_budget: Duration,
    /// Reserved at the end of the budget for the final state write.
    pub safety_margin: Duration,
    /// The time budget only stops the loop once this many posts are stored.
    pub min_items: u64,
    /// Longest a single attempt at a page may take.
    pub request_timeout: Duration,
    /// Pages fetched ahead of the consumer; 0 disables prefetch.
    pub prefetch_depth: usize,
    pub retry: RetryPolicy,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_iterations: 50,
            time_budget: Duration::from_secs(900),
            safety_margin: Duration::from_secs(60),
            min_items: 0,
            request_timeout: Duration::from_secs(20),
            prefetch_depth: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchLimits {
    /// Elapsed time after which the loop may stop early.
    pub fn budget_threshold(&self) -> chrono::Duration {
        let usable = self.time_budget.saturating_sub(self.safety_margin);
        chrono::Duration::from_std(usable).unwrap_or(chrono::Duration::MAX)
    }

    /// Whether a page request started `elapsed` into the invocation could
    /// end past the budget threshold, counting every retry.
    pub fn out_of_time(&self, elapsed: chrono::Duration) -> bool {
        let request = chrono::Duration::from_std(self.retry.max_elapsed(self.request_timeout))
            .unwrap_or(chrono::Duration::MAX);
        match elapsed.checked_add(&request) {
            Some(end) => end >= self.budget_threshold(),
            None => true,
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page reached past the cutoff
    WindowExhausted,
    /// The feed reported no further pages
    FeedDrained,
    /// The feed refused to paginate deeper
    PaginationLimit,
    TimeBudget,
    IterationCap,
    /// Rate limiting outlasted the retries
    RateLimited,
    Shutdown,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WindowExhausted => "window_exhausted",
            Self::FeedDrained => "feed_drained",
            Self::PaginationLimit => "pagination_limit",
            Self::TimeBudget => "time_budget",
            Self::IterationCap => "iteration_cap",
            Self::RateLimited => "rate_limited",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether nothing is left to collect for this window.
    pub fn exhausts_window(self) -> bool {
        matches!(
            self,
            Self::WindowExhausted | Self::FeedDrained | Self::PaginationLimit
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one invocation of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Posts handed to the sink.
    pub total: u64,
    /// Where the next invocation resumes; `None` once exhausted.
    pub final_cursor: Option<String>,
    pub exhausted: bool,
    pub pages: usize,
    /// Items dropped for unparsable timestamps.
    pub skipped: usize,
    /// Items dropped as already seen.
    pub duplicates: usize,
    pub stop_reason: StopReason,
}

/// Supplies pages to the loop.
pub(crate) trait PageSource {
    fn next_page(&mut self, cursor: Option<&str>) -> Result<FeedPage, FeedError>;
}

/// Request one page with retries.
fn request_page(
    feed: &dyn Feed,
    cursor: Option<&str>,
    cutoff: DateTime<Utc>,
    limits: &FetchLimits,
) -> Result<FeedPage, FeedError> {
    let label = format!("page after {}", cursor.unwrap_or("<start>"));
    retry_with_backoff(&label, &limits.retry, || {
        feed.fetch_page(cursor, cutoff, limits.page_size)
    })
}

/// Time spent so far in one invocation.
pub(crate) struct Budget<'a> {
    clock: &'a SharedClock,
    started: DateTime<Utc>,
    limits: &'a FetchLimits,
}

impl Budget<'_> {
    pub(crate) fn elapsed(&self) -> chrono::Duration {
        self.clock.now() - self.started
    }

    /// Whether another request would risk running past the budget.
    pub(crate) fn exceeded(&self) -> bool {
        self.limits.out_of_time(self.elapsed())
    }
}

/// Requests pages straight from the feed.
#[derive(Clone, Copy)]
pub(crate) struct Direct<'a> {
    pub(crate) feed: &'a dyn Feed,
    pub(crate) cutoff: DateTime<Utc>,
    pub(crate) limits: &'a FetchLimits,
}

impl Direct<'_> {
    pub(crate) fn request(&self, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        request_page(self.feed, cursor, self.cutoff, self.limits)
    }
}

impl PageSource for Direct<'_> {
    fn next_page(&mut self, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        self.request(cursor)
    }
}

/// Runs the fetch loop against one feed.
pub struct WindowFetcher<'a> {
    feed: &'a dyn Feed,
    clock: SharedClock,
    limits: FetchLimits,
    shutdown: Arc<AtomicBool>,
}

impl<'a> WindowFetcher<'a> {
    pub fn new(feed: &'a dyn Feed, clock: SharedClock) -> Self {
        Self {
            feed,
            clock,
            limits: FetchLimits::default(),
            shutdown: Arc::clone(shutdown_flag()),
        }
    }

    pub fn with_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Use `flag` instead of the process-wide shutdown flag.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    /// Collect `[cutoff, now]` starting at `resume` (or the newest page).
    pub fn fetch(
        &self,
        cutoff: DateTime<Utc>,
        resume: Option<&str>,
        sink: &mut dyn WindowSink,
    ) -> Result<FetchOutcome, FetchError> {
        let resume = resume.filter(|c| !c.is_empty());
        let budget = Budget {
            clock: &self.clock,
            started: self.clock.now(),
            limits: &self.limits,
        };
        let mut direct = Direct {
            feed: self.feed,
            cutoff,
            limits: &self.limits,
        };
        if self.limits.prefetch_depth == 0 {
            self.run(cutoff, resume, sink, &mut direct, &budget)
        } else {
            prefetch::with_prefetch(direct, resume, &budget, |source| {
                self.run(cutoff, resume, sink, source, &budget)
            })
        }
    }

    fn run(
        &self,
        cutoff: DateTime<Utc>,
        resume: Option<&str>,
        sink: &mut dyn WindowSink,
        source: &mut dyn PageSource,
        budget: &Budget<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut cursor = resume.map(str::to_string);
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut total = 0u64;
        let mut pages = 0usize;
        let mut skipped = 0usize;
        let mut duplicates = 0usize;

        let stop_reason = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                log::warn!("shutdown requested, stopping after {pages} pages");
                break StopReason::Shutdown;
            }
            // Always take at least one page so a resumed window moves.
            if pages > 0 && total >= self.limits.min_items && budget.exceeded() {
                log::info!(
                    "time budget reached after {}s with {total} posts; stopping with cursor kept",
                    budget.elapsed().num_seconds()
                );
                break StopReason::TimeBudget;
            }
            if pages >= self.limits.max_iterations {
                log::warn!(
                    "iteration cap of {} pages reached; stopping with cursor kept",
                    self.limits.max_iterations
                );
                break StopReason::IterationCap;
            }

            let page = match source.next_page(cursor.as_deref()) {
                Ok(page) => page,
                Err(FeedError::PaginationLimit(message)) => {
                    log::warn!("feed refused deeper pagination ({message}); treating window as exhausted");
                    cursor = None;
                    sink.checkpoint(None, false)?;
                    break StopReason::PaginationLimit;
                }
                Err(e @ FeedError::RateLimited { .. }) => {
                    log::warn!("{e} after retries; stopping with cursor kept");
                    break StopReason::RateLimited;
                }
                Err(e) => return Err(e.into()),
            };
            pages += 1;

            if pages == 1 && resume.is_none() && page.items.is_empty() {
                log::warn!(
                    "!!! first page of a fresh window is empty (cutoff {}); check the feed's sort order and time semantics",
                    cutoff.to_rfc3339()
                );
            }

            let mut fresh = Vec::with_capacity(page.items.len());
            for item in &page.items {
                let Some(post) = item.to_post() else {
                    log::warn!(
                        "skipping {}: unparsable created_at {:?}",
                        item.uri,
                        item.created_at
                    );
                    skipped += 1;
                    continue;
                };
                if post.created_at < cutoff {
                    continue;
                }
                if !seen.insert(post.uri.clone()) {
                    duplicates += 1;
                    continue;
                }
                fresh.push(post);
            }
            if !fresh.is_empty() {
                sink.persist(&fresh)?;
                total += fresh.len() as u64;
            }
            log::debug!(
                "page {pages}: {} items, {} stored, {total} total",
                page.items.len(),
                fresh.len()
            );

            if page.reaches(cutoff) {
                cursor = None;
                sink.checkpoint(None, false)?;
                break StopReason::WindowExhausted;
            }
            let Some(next) = page.continuation() else {
                cursor = None;
                sink.checkpoint(None, false)?;
                break StopReason::FeedDrained;
            };
            cursor = Some(next.to_string());
            sink.checkpoint(cursor.as_deref(), true)?;
        };

        let outcome = FetchOutcome {
            total,
            final_cursor: cursor,
            exhausted: stop_reason.exhausts_window(),
            pages,
            skipped,
            duplicates,
            stop_reason,
        };
        log::info!(
            "fetched {} posts over {} pages ({}; {} duplicates, {} skipped)",
            outcome.total,
            outcome.pages,
            outcome.stop_reason,
            outcome.duplicates,
            outcome.skipped
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedItem, StaticFeed};
    use crate::sink::SinkError;
    use chrono::TimeZone;
    use feedline_core::{HttpError, ManualClock};
    use feedline_store::{Engagement, Post};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn cutoff() -> DateTime<Utc> {
        now() - chrono::Duration::minutes(30)
    }

    fn item(uri: &str, minutes_ago: i64) -> FeedItem {
        FeedItem {
            uri: uri.into(),
            created_at: (now() - chrono::Duration::minutes(minutes_ago)).to_rfc3339(),
            author: "alice".into(),
            text: format!("text of {uri}"),
            engagement: Engagement::default(),
        }
    }

    fn page(items: Vec<FeedItem>, next: Option<&str>) -> Result<FeedPage, FeedError> {
        Ok(FeedPage {
            items,
            next_cursor: next.map(String::from),
            has_more: next.is_some(),
        })
    }

    #[derive(Default)]
    struct ScriptedFeed {
        script: Mutex<VecDeque<Result<FeedPage, FeedError>>>,
        requests: Mutex<Vec<Option<String>>>,
        tick: Option<(Arc<ManualClock>, chrono::Duration)>,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Result<FeedPage, FeedError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn ticking(mut self, clock: Arc<ManualClock>, by: chrono::Duration) -> Self {
            self.tick = Some((clock, by));
            self
        }

        fn requests(&self) -> Vec<Option<String>> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Feed for ScriptedFeed {
        fn fetch_page(
            &self,
            cursor: Option<&str>,
            _since: DateTime<Utc>,
            _limit: usize,
        ) -> Result<FeedPage, FeedError> {
            self.requests.lock().unwrap().push(cursor.map(String::from));
            if let Some((clock, by)) = &self.tick {
                clock.advance(*by);
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| page(vec![], None))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        posts: Vec<Post>,
        checkpoints: Vec<(Option<String>, bool)>,
    }

    impl WindowSink for RecordingSink {
        fn persist(&mut self, posts: &[Post]) -> Result<(), SinkError> {
            self.posts.extend_from_slice(posts);
            Ok(())
        }

        fn checkpoint(&mut self, cursor: Option<&str>, has_more: bool) -> Result<(), SinkError> {
            self.checkpoints.push((cursor.map(String::from), has_more));
            Ok(())
        }
    }

    fn uris(sink: &RecordingSink) -> Vec<&str> {
        sink.posts.iter().map(|p| p.uri.as_str()).collect()
    }

    fn limits() -> FetchLimits {
        FetchLimits {
            retry: RetryPolicy::immediate(2),
            ..FetchLimits::default()
        }
    }

    fn fetcher<'a>(feed: &'a dyn Feed, clock: Arc<ManualClock>) -> WindowFetcher<'a> {
        WindowFetcher::new(feed, clock)
            .with_limits(limits())
            .with_shutdown(Arc::new(AtomicBool::new(false)))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(now()))
    }

    #[test]
    fn stops_at_the_page_that_reaches_the_cutoff() {
        let feed = ScriptedFeed::new(vec![
            page(vec![item("a", 1), item("b", 5)], Some("c1")),
            page(vec![item("c", 10), item("d", 20)], Some("c2")),
            page(vec![item("e", 25), item("f", 35)], Some("c3")),
            page(vec![item("g", 40)], Some("c4")),
        ]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();

        assert_eq!(
            feed.requests(),
            vec![None, Some("c1".into()), Some("c2".into())]
        );
        assert_eq!(outcome.stop_reason, StopReason::WindowExhausted);
        assert!(outcome.exhausted);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.final_cursor, None);
        // "f" is older than the cutoff and is not stored
        assert_eq!(uris(&sink), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(outcome.total, 5);
        assert_eq!(
            sink.checkpoints,
            vec![
                (Some("c1".into()), true),
                (Some("c2".into()), true),
                (None, false)
            ]
        );
    }

    #[test]
    fn time_budget_stops_a_window_that_never_ends() {
        let clock = clock();
        let script = (0..20)
            .map(|i| {
                let cursor = format!("c{}", i + 1);
                page(vec![item(&format!("p{i}"), 1)], Some(cursor.as_str()))
            })
            .collect();
        let feed = ScriptedFeed::new(script).ticking(clock.clone(), chrono::Duration::seconds(60));
        let limits = FetchLimits {
            time_budget: Duration::from_secs(300),
            safety_margin: Duration::from_secs(60),
            request_timeout: Duration::ZERO,
            ..limits()
        };
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock)
            .with_limits(limits)
            .fetch(cutoff(), None, &mut sink)
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::TimeBudget);
        assert_eq!(outcome.pages, 4);
        assert!(!outcome.exhausted);
        assert_eq!(outcome.final_cursor.as_deref(), Some("c4"));
        assert_eq!(sink.checkpoints.last(), Some(&(Some("c4".into()), true)));
    }

    fn endless_script(n: usize) -> Vec<Result<FeedPage, FeedError>> {
        (0..n)
            .map(|i| {
                let cursor = format!("c{}", i + 1);
                page(vec![item(&format!("p{i}"), 1)], Some(cursor.as_str()))
            })
            .collect()
    }

    #[test]
    fn no_request_starts_that_could_outlast_the_budget() {
        let clock = clock();
        let feed = ScriptedFeed::new(endless_script(20))
            .ticking(clock.clone(), chrono::Duration::seconds(50));
        let limits = FetchLimits {
            time_budget: Duration::from_secs(300),
            safety_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(20),
            ..limits()
        };
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock)
            .with_limits(limits)
            .fetch(cutoff(), None, &mut sink)
            .unwrap();

        // at 200s a fifth request (three attempts of 20s) could end at 260s,
        // past the 240s threshold
        assert_eq!(outcome.stop_reason, StopReason::TimeBudget);
        assert_eq!(outcome.pages, 4);
        assert_eq!(feed.requests().len(), 4);
        assert_eq!(outcome.final_cursor.as_deref(), Some("c4"));
    }

    #[test]
    fn prefetch_respects_the_time_budget() {
        let clock = clock();
        let feed = ScriptedFeed::new(endless_script(20))
            .ticking(clock.clone(), chrono::Duration::seconds(50));
        let limits = FetchLimits {
            time_budget: Duration::from_secs(300),
            safety_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(20),
            prefetch_depth: 3,
            ..limits()
        };
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock)
            .with_limits(limits)
            .fetch(cutoff(), None, &mut sink)
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::TimeBudget);
        assert_eq!(feed.requests().len(), 4);
        assert!((1..=4).contains(&outcome.pages));
        assert_eq!(
            outcome.final_cursor,
            Some(format!("c{}", outcome.pages))
        );
    }

    #[test]
    fn prefetch_hands_over_when_min_items_is_short() {
        let clock = clock();
        let feed = ScriptedFeed::new(endless_script(20))
            .ticking(clock.clone(), chrono::Duration::seconds(30));
        let limits = FetchLimits {
            time_budget: Duration::from_secs(120),
            safety_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(20),
            min_items: 1_000,
            max_iterations: 5,
            prefetch_depth: 2,
            ..limits()
        };
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock)
            .with_limits(limits)
            .fetch(cutoff(), None, &mut sink)
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::IterationCap);
        assert_eq!(outcome.pages, 5);
        assert_eq!(uris(&sink), vec!["p0", "p1", "p2", "p3", "p4"]);
        assert_eq!(
            feed.requests(),
            vec![
                None,
                Some("c1".into()),
                Some("c2".into()),
                Some("c3".into()),
                Some("c4".into())
            ]
        );
        assert_eq!(outcome.final_cursor.as_deref(), Some("c5"));
    }

    #[test]
    fn time_budget_waits_for_min_items() {
        let clock = clock();
        let script = (0..20)
            .map(|i| {
                let cursor = format!("c{}", i + 1);
                page(vec![item(&format!("p{i}"), 1)], Some(cursor.as_str()))
            })
            .collect();
        let feed = ScriptedFeed::new(script).ticking(clock.clone(), chrono::Duration::seconds(60));
        let limits = FetchLimits {
            time_budget: Duration::from_secs(120),
            safety_margin: Duration::from_secs(60),
            min_items: 1_000,
            max_iterations: 8,
            ..limits()
        };
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock)
            .with_limits(limits)
            .fetch(cutoff(), None, &mut sink)
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::IterationCap);
        assert_eq!(outcome.pages, 8);
        assert_eq!(outcome.final_cursor.as_deref(), Some("c8"));
    }

    #[test]
    fn drifted_item_is_stored_once() {
        let feed = ScriptedFeed::new(vec![
            page(vec![item("a", 1), item("b", 2)], Some("c1")),
            page(vec![item("b", 2), item("c", 3)], None),
        ]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(uris(&sink), vec!["a", "b", "c"]);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.stop_reason, StopReason::FeedDrained);
        assert!(outcome.exhausted);
    }

    #[test]
    fn unparsable_timestamps_are_skipped() {
        let mut bad = item("bad", 1);
        bad.created_at = "not a time".into();
        let feed = ScriptedFeed::new(vec![page(vec![item("a", 1), bad, item("c", 2)], None)]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(uris(&sink), vec!["a", "c"]);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn pagination_limit_is_a_soft_stop() {
        let feed = ScriptedFeed::new(vec![
            page(vec![item("a", 1)], Some("c1")),
            Err(FeedError::PaginationLimit("cursor too deep".into())),
        ]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::PaginationLimit);
        assert!(outcome.exhausted);
        assert_eq!(outcome.final_cursor, None);
        assert_eq!(outcome.total, 1);
        assert_eq!(sink.checkpoints.last(), Some(&(None, false)));
    }

    #[test]
    fn persistent_rate_limit_keeps_cursor() {
        let limited = || {
            Err(FeedError::RateLimited {
                retry_after: Some(Duration::ZERO),
            })
        };
        let feed = ScriptedFeed::new(vec![
            page(vec![item("a", 1)], Some("c1")),
            limited(),
            limited(),
            limited(),
        ]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::RateLimited);
        assert!(!outcome.exhausted);
        assert_eq!(outcome.final_cursor.as_deref(), Some("c1"));
        // initial attempt + 2 retries on the second page
        assert_eq!(feed.requests().len(), 4);
    }

    #[test]
    fn transient_errors_are_retried() {
        let feed = ScriptedFeed::new(vec![
            Err(FeedError::Http(HttpError::Status {
                status: 503,
                message: "unavailable".into(),
                retry_after: None,
            })),
            page(vec![item("a", 1)], None),
        ]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.pages, 1);
    }

    #[test]
    fn hard_errors_propagate() {
        let feed = ScriptedFeed::new(vec![
            page(vec![item("a", 1)], Some("c1")),
            Err(FeedError::Decode("truncated body".into())),
        ]);
        let mut sink = RecordingSink::default();
        let result = fetcher(&feed, clock()).fetch(cutoff(), None, &mut sink);
        assert!(matches!(result, Err(FetchError::Feed(FeedError::Decode(_)))));
        // first page is already persisted and checkpointed
        assert_eq!(uris(&sink), vec!["a"]);
        assert_eq!(sink.checkpoints, vec![(Some("c1".into()), true)]);
    }

    #[test]
    fn empty_first_page_keeps_looping() {
        let feed = ScriptedFeed::new(vec![
            page(vec![], Some("c1")),
            page(vec![item("a", 1)], None),
        ]);
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock())
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.total, 1);
    }

    #[test]
    fn resumes_from_cursor() {
        let feed = ScriptedFeed::new(vec![page(vec![item("z", 3)], None)]);
        let mut sink = RecordingSink::default();
        fetcher(&feed, clock())
            .fetch(cutoff(), Some("c5"), &mut sink)
            .unwrap();
        assert_eq!(feed.requests(), vec![Some("c5".into())]);
    }

    #[test]
    fn shutdown_stops_before_requesting() {
        let feed = ScriptedFeed::new(vec![page(vec![item("a", 1)], None)]);
        let mut sink = RecordingSink::default();
        let outcome = WindowFetcher::new(&feed, clock())
            .with_limits(limits())
            .with_shutdown(Arc::new(AtomicBool::new(true)))
            .fetch(cutoff(), Some("c9"), &mut sink)
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Shutdown);
        assert_eq!(outcome.pages, 0);
        assert_eq!(outcome.final_cursor.as_deref(), Some("c9"));
        assert!(feed.requests().is_empty());
    }

    fn minute_feed(n: i64) -> StaticFeed {
        StaticFeed::new((0..n).map(|i| item(&format!("m{i}"), i)).collect())
    }

    #[test]
    fn prefetch_matches_sequential() {
        let sequential_feed = minute_feed(100);
        let prefetch_feed = minute_feed(100);
        let base = FetchLimits {
            page_size: 7,
            ..limits()
        };

        let mut seq_sink = RecordingSink::default();
        let seq = fetcher(&sequential_feed, clock())
            .with_limits(base)
            .fetch(cutoff(), None, &mut seq_sink)
            .unwrap();

        let mut pre_sink = RecordingSink::default();
        let pre = fetcher(&prefetch_feed, clock())
            .with_limits(FetchLimits {
                prefetch_depth: 3,
                ..base
            })
            .fetch(cutoff(), None, &mut pre_sink)
            .unwrap();

        assert_eq!(seq, pre);
        assert_eq!(seq.stop_reason, StopReason::WindowExhausted);
        // minutes 0..=30 are inside the window
        assert_eq!(seq.total, 31);
        assert_eq!(uris(&seq_sink), uris(&pre_sink));
        assert_eq!(seq_sink.checkpoints, pre_sink.checkpoints);
        // the producer stops on its own at the exhausting page
        assert_eq!(sequential_feed.requests(), prefetch_feed.requests());
    }

    #[test]
    fn prefetch_stops_with_consumer() {
        let clock = clock();
        let script = (0..30)
            .map(|i| {
                let cursor = format!("c{}", i + 1);
                page(vec![item(&format!("p{i}"), 1)], Some(cursor.as_str()))
            })
            .collect();
        let feed = ScriptedFeed::new(script);
        let limits = FetchLimits {
            max_iterations: 5,
            prefetch_depth: 2,
            ..limits()
        };
        let mut sink = RecordingSink::default();
        let outcome = fetcher(&feed, clock)
            .with_limits(limits)
            .fetch(cutoff(), None, &mut sink)
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::IterationCap);
        assert_eq!(outcome.pages, 5);
        assert_eq!(outcome.final_cursor.as_deref(), Some("c5"));
        assert!(feed.requests().len() <= 5);
    }

    #[test]
    fn budget_threshold_saturates() {
        let limits = FetchLimits {
            time_budget: Duration::from_secs(30),
            safety_margin: Duration::from_secs(60),
            ..FetchLimits::default()
        };
        assert_eq!(limits.budget_threshold(), chrono::Duration::zero());
    }

    #[test]
    fn out_of_time_counts_the_next_request() {
        let limits = FetchLimits {
            time_budget: Duration::from_secs(300),
            safety_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::immediate(0),
            ..FetchLimits::default()
        };
        assert!(!limits.out_of_time(chrono::Duration::seconds(209)));
        assert!(limits.out_of_time(chrono::Duration::seconds(210)));
        assert!(limits.out_of_time(chrono::Duration::MAX));
    }
}
