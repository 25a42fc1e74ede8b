//! Key/value table contract shared by all backends
//!
//! Modelled on a managed wide-column store: rows are addressed by
//! `(pk, sk)`, writes may carry a precondition, and both prefix queries and
//! full scans are paginated by an opaque continuation token.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub pk: String,
    pub sk: String,
    /// Incremented by the backend on every successful write.
    pub version: u64,
    /// TTL attribute, epoch seconds. Expired rows are invisible to reads.
    pub expires_at: Option<i64>,
    pub data: serde_json::Value,
}

impl Row {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    pub fn is_expired(&self, now_epoch: i64) -> bool {
        self.expires_at.is_some_and(|t| t <= now_epoch)
    }
}

/// A row to be written; the backend assigns the version.
#[derive(Debug, Clone)]
pub struct NewRow {
    pub pk: String,
    pub sk: String,
    pub expires_at: Option<i64>,
    pub data: serde_json::Value,
}

impl NewRow {
    pub fn encode<T: Serialize>(
        pk: impl Into<String>,
        sk: impl Into<String>,
        expires_at: Option<i64>,
        value: &T,
    ) -> Result<Self> {
        Ok(Self {
            pk: pk.into(),
            sk: sk.into(),
            expires_at,
            data: serde_json::to_value(value)?,
        })
    }
}

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Write unconditionally (upsert).
    None,
    /// Write only if no live row exists for the key.
    DoesNotExist,
    /// Write only if the live row's version matches.
    MatchesVersion(u64),
}

/// Result of a conditional write.
///
/// A failed precondition is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Written { version: u64 },
    PreconditionFailed { current_version: Option<u64> },
}

impl PutOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    /// Present when more rows may follow. Pass back as `start_after`.
    pub next_token: Option<String>,
}

/// Table backend.
///
/// Backends may return fewer rows than `limit` (and may cap `limit`); only a
/// missing `next_token` means the result is complete. Use
/// [`query_all`](crate::paging::query_all) / [`scan_all`](crate::paging::scan_all)
/// instead of calling the page methods directly.
pub trait Table: Send + Sync {
    /// Table name (for logs and file names).
    fn name(&self) -> &str;

    /// Read one live row. `Ok(None)` means no row exists for the key.
    fn get(&self, pk: &str, sk: &str) -> Result<Option<Row>>;

    /// Write a row subject to a precondition.
    fn put(&self, row: NewRow, precondition: Precondition) -> Result<PutOutcome>;

    /// Rows with partition `pk` whose sort key starts with `sk_prefix`,
    /// in sort-key order.
    fn query_page(
        &self,
        pk: &str,
        sk_prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Page>;

    /// All live rows, in unspecified order.
    fn scan_page(&self, start_after: Option<&str>, limit: usize) -> Result<Page>;
}

/// Table handle shared between stores.
pub type SharedTable = Arc<dyn Table>;
