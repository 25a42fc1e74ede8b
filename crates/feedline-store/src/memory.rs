//! In-memory table backend
//!
//! Thread-safe via `RwLock`. Used directly by tests and as the working set
//! of [`FileTable`](crate::file::FileTable). Honors TTL against the injected
//! clock and caps every page at `page_limit` rows, so pagination bugs show up
//! with small data sets.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use feedline_core::{Clock, SharedClock};

use crate::table::{NewRow, Page, Precondition, PutOutcome, Row, Table};
use crate::{Result, StoreError};

/// Default maximum rows per page.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Separator inside scan continuation tokens.
const TOKEN_SEP: char = '\u{1f}';

type Key = (String, String);

/// In-memory table.
pub struct MemoryTable {
    name: String,
    rows: RwLock<BTreeMap<Key, Row>>,
    clock: SharedClock,
    page_limit: usize,
    injected_failures: AtomicU32,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            clock,
            page_limit: DEFAULT_PAGE_LIMIT,
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Cap rows per page (minimum 1).
    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Make the next `n` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Number of stored rows, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows, expired included (for persistence).
    pub(crate) fn snapshot(&self) -> Result<Vec<Row>> {
        Ok(self.read_rows()?.values().cloned().collect())
    }

    /// Replace contents with previously persisted rows.
    pub(crate) fn load(&self, rows: Vec<Row>) -> Result<()> {
        let mut map = self.write_rows()?;
        map.clear();
        for row in rows {
            map.insert((row.pk.clone(), row.sk.clone()), row);
        }
        Ok(())
    }

    /// Drop rows whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.now_epoch();
        let mut map = self.write_rows()?;
        let before = map.len();
        map.retain(|_, row| !row.is_expired(now));
        Ok(before - map.len())
    }

    fn now_epoch(&self) -> i64 {
        self.clock.now().timestamp()
    }

    fn check_injected_failure(&self) -> Result<()> {
        let took = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(StoreError::Unavailable(format!(
                "{}: injected failure",
                self.name
            )));
        }
        Ok(())
    }

    fn read_rows(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Key, Row>>> {
        self.rows
            .read()
            .map_err(|_| StoreError::Unavailable(format!("{}: lock poisoned", self.name)))
    }

    fn write_rows(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<Key, Row>>> {
        self.rows
            .write()
            .map_err(|_| StoreError::Unavailable(format!("{}: lock poisoned", self.name)))
    }

    fn effective_limit(&self, limit: usize) -> usize {
        limit.clamp(1, self.page_limit)
    }
}

fn encode_scan_token(pk: &str, sk: &str) -> String {
    format!("{pk}{TOKEN_SEP}{sk}")
}

fn decode_scan_token(token: &str) -> Result<Key> {
    token
        .split_once(TOKEN_SEP)
        .map(|(pk, sk)| (pk.to_string(), sk.to_string()))
        .ok_or_else(|| StoreError::Invalid(format!("malformed scan token: {token:?}")))
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, pk: &str, sk: &str) -> Result<Option<Row>> {
        self.check_injected_failure()?;
        let now = self.now_epoch();
        let rows = self.read_rows()?;
        Ok(rows
            .get(&(pk.to_string(), sk.to_string()))
            .filter(|row| !row.is_expired(now))
            .cloned())
    }

    fn put(&self, row: NewRow, precondition: Precondition) -> Result<PutOutcome> {
        self.check_injected_failure()?;
        let now = self.now_epoch();
        let mut rows = self.write_rows()?;
        let key = (row.pk.clone(), row.sk.clone());
        let existing = rows.get(&key);
        let live_version = existing.filter(|r| !r.is_expired(now)).map(|r| r.version);

        let allowed = match precondition {
            Precondition::None => true,
            Precondition::DoesNotExist => live_version.is_none(),
            Precondition::MatchesVersion(expected) => live_version == Some(expected),
        };
        if !allowed {
            return Ok(PutOutcome::PreconditionFailed {
                current_version: live_version,
            });
        }

        let version = existing.map_or(1, |r| r.version + 1);
        rows.insert(
            key,
            Row {
                pk: row.pk,
                sk: row.sk,
                version,
                expires_at: row.expires_at,
                data: row.data,
            },
        );
        Ok(PutOutcome::Written { version })
    }

    fn query_page(
        &self,
        pk: &str,
        sk_prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Page> {
        self.check_injected_failure()?;
        let now = self.now_epoch();
        let limit = self.effective_limit(limit);
        let rows = self.read_rows()?;

        let lower = match start_after {
            Some(sk) => Bound::Excluded((pk.to_string(), sk.to_string())),
            None => Bound::Included((pk.to_string(), sk_prefix.to_string())),
        };
        let page: Vec<Row> = rows
            .range((lower, Bound::Unbounded))
            .map(|(_, row)| row)
            .take_while(|row| row.pk == pk)
            .skip_while(|row| row.sk.as_str() < sk_prefix)
            .take_while(|row| row.sk.starts_with(sk_prefix))
            .filter(|row| !row.is_expired(now))
            .take(limit)
            .cloned()
            .collect();

        let next_token = if page.len() == limit {
            page.last().map(|row| row.sk.clone())
        } else {
            None
        };
        Ok(Page {
            rows: page,
            next_token,
        })
    }

    fn scan_page(&self, start_after: Option<&str>, limit: usize) -> Result<Page> {
        self.check_injected_failure()?;
        let now = self.now_epoch();
        let limit = self.effective_limit(limit);
        let rows = self.read_rows()?;

        let lower = match start_after {
            Some(token) => Bound::Excluded(decode_scan_token(token)?),
            None => Bound::Unbounded,
        };
        let page: Vec<Row> = rows
            .range((lower, Bound::Unbounded))
            .map(|(_, row)| row)
            .filter(|row| !row.is_expired(now))
            .take(limit)
            .cloned()
            .collect();

        let next_token = if page.len() == limit {
            page.last().map(|row| encode_scan_token(&row.pk, &row.sk))
        } else {
            None
        };
        Ok(Page {
            rows: page,
            next_token,
        })
    }
}
