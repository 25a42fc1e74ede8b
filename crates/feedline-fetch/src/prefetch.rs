//! Read-ahead over the cursor chain
//!
//! A producer thread requests pages ahead of the fetch loop and hands them
//! over a bounded channel. It stops by itself on the page that reaches the
//! cutoff, on a page without continuation, on an error, or at the iteration
//! cap. These are the same conditions the consumer stops on, so no page past
//! the end of the window is ever requested.
//!
//! The producer also stops once another request could outlast the time
//! budget. The consumer may still want pages then (it has not stored
//! `min_items` yet), so after the channel drains it requests them itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use crate::error::FeedError;
use crate::feed::FeedPage;
use crate::window::{Budget, Direct, PageSource};

type PageResult = Result<FeedPage, FeedError>;

struct Prefetched<'a> {
    rx: Option<Receiver<PageResult>>,
    direct: Direct<'a>,
}

impl PageSource for Prefetched<'_> {
    fn next_page(&mut self, cursor: Option<&str>) -> PageResult {
        // The producer follows the same cursor chain, so while it runs the
        // cursor is not needed.
        if let Some(rx) = &self.rx {
            match rx.recv() {
                Ok(result) => return result,
                Err(_) => {
                    log::debug!("prefetch: producer done, requesting directly");
                    self.rx = None;
                }
            }
        }
        self.direct.request(cursor)
    }
}

/// Run `consume` against pages prefetched `limits.prefetch_depth` ahead.
pub(crate) fn with_prefetch<R>(
    direct: Direct<'_>,
    resume: Option<&str>,
    budget: &Budget<'_>,
    consume: impl FnOnce(&mut dyn PageSource) -> R,
) -> R {
    let (tx, rx) = mpsc::sync_channel(direct.limits.prefetch_depth);
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let stop = &stop;
        s.spawn(move || produce(direct, resume, budget, stop, tx));

        let mut source = Prefetched {
            rx: Some(rx),
            direct,
        };
        let result = consume(&mut source);
        stop.store(true, Ordering::Relaxed);
        // Unblocks a producer waiting on a full channel.
        drop(source);
        result
    })
}

fn produce(
    direct: Direct<'_>,
    resume: Option<&str>,
    budget: &Budget<'_>,
    stop: &AtomicBool,
    tx: SyncSender<PageResult>,
) {
    let cutoff = direct.cutoff;
    let mut cursor = resume.map(str::to_string);
    for n in 1..=direct.limits.max_iterations {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        if n > 1 && budget.exceeded() {
            log::debug!("prefetch: time budget reached after {} pages", n - 1);
            return;
        }
        let result = direct.request(cursor.as_deref());
        let next = match &result {
            Ok(page) if !page.reaches(cutoff) => page.continuation().map(str::to_string),
            _ => None,
        };
        if tx.send(result).is_err() {
            return;
        }
        match next {
            Some(c) => cursor = Some(c),
            None => {
                log::debug!("prefetch: chain ends after {n} pages");
                return;
            }
        }
    }
}
