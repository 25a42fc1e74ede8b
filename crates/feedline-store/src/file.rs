//! File-backed table for local invocations
//!
//! Layout: one JSON document per table under the store directory, each
//! guarded by an advisory lock file:
//! ```text
//! {dir}/
//! ├── run_state.json
//! ├── run_state.json.lock
//! ├── posts.json
//! ├── observations.json
//! └── daily.json
//! ```
//! Every operation takes the table's lock and reloads the document first,
//! so separate processes working on the same directory see each other's
//! writes and preconditions hold across them. Writes rewrite the document
//! (tmp file + atomic rename) before the lock is released.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fd_lock::RwLock as FileLock;
use feedline_core::SharedClock;
use serde::{Deserialize, Serialize};

use crate::memory::MemoryTable;
use crate::table::{NewRow, Page, Precondition, PutOutcome, Row, Table};
use crate::{Result, StoreError};

/// Bump when the on-disk layout changes.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    format_version: u32,
    table: String,
    rows: Vec<Row>,
}

/// Table persisted to a single JSON file.
pub struct FileTable {
    path: PathBuf,
    lock_path: PathBuf,
    /// Working copy, refreshed from disk under the lock.
    inner: MemoryTable,
}

impl FileTable {
    /// Open (or create) `{dir}/{name}.json`.
    pub fn open(dir: &Path, name: &str, clock: SharedClock) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let table = Self {
            path: dir.join(format!("{name}.json")),
            lock_path: dir.join(format!("{name}.json.lock")),
            inner: MemoryTable::new(name, clock),
        };
        let rows = table.shared(|inner| Ok(inner.len()))?;
        log::debug!("{name}: loaded {rows} rows from {}", table.path.display());
        Ok(table)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop expired rows and rewrite the file.
    pub fn compact(&self) -> Result<usize> {
        self.exclusive(|inner| {
            let removed = inner.purge_expired()?;
            Ok((removed, removed > 0))
        })
    }

    fn lock_file(&self) -> Result<FileLock<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        Ok(FileLock::new(file))
    }

    /// Run `f` on the fresh working copy under a shared lock.
    fn shared<T>(&self, f: impl FnOnce(&MemoryTable) -> Result<T>) -> Result<T> {
        let lock = self.lock_file()?;
        let _guard = lock.read()?;
        self.reload()?;
        f(&self.inner)
    }

    /// Run `f` on the fresh working copy under an exclusive lock, persisting
    /// when it reports a change.
    fn exclusive<T>(&self, f: impl FnOnce(&MemoryTable) -> Result<(T, bool)>) -> Result<T> {
        let mut lock = self.lock_file()?;
        let _guard = lock.write()?;
        self.reload()?;
        let (out, changed) = f(&self.inner)?;
        if changed {
            self.persist()?;
        }
        Ok(out)
    }

    fn reload(&self) -> Result<()> {
        if !self.path.exists() {
            return self.inner.load(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let file: TableFile = serde_json::from_str(&content)?;
        if file.format_version != CURRENT_FORMAT_VERSION {
            return Err(StoreError::Invalid(format!(
                "{}: format_version {} != current {}",
                self.path.display(),
                file.format_version,
                CURRENT_FORMAT_VERSION
            )));
        }
        self.inner.load(file.rows)
    }

    fn persist(&self) -> Result<()> {
        let file = TableFile {
            format_version: CURRENT_FORMAT_VERSION,
            table: self.inner.name().to_string(),
            rows: self.inner.snapshot()?,
        };
        let json = serde_json::to_vec(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Table for FileTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, pk: &str, sk: &str) -> Result<Option<Row>> {
        self.shared(|inner| inner.get(pk, sk))
    }

    fn put(&self, row: NewRow, precondition: Precondition) -> Result<PutOutcome> {
        self.exclusive(|inner| {
            let outcome = inner.put(row, precondition)?;
            let written = outcome.is_written();
            Ok((outcome, written))
        })
    }

    fn query_page(
        &self,
        pk: &str,
        sk_prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Page> {
        self.shared(|inner| inner.query_page(pk, sk_prefix, start_after, limit))
    }

    fn scan_page(&self, start_after: Option<&str>, limit: usize) -> Result<Page> {
        self.shared(|inner| inner.scan_page(start_after, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_core::SystemClock;
    use std::sync::Arc;

    fn row(pk: &str, sk: &str) -> NewRow {
        NewRow::encode(pk, sk, None, &serde_json::json!({"v": sk})).unwrap()
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let table = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();
            table.put(row("run-1", "orchestrator"), Precondition::None).unwrap();
            table.put(row("run-1", "fetcher"), Precondition::None).unwrap();
            table.put(row("run-1", "fetcher"), Precondition::None).unwrap();
        }
        let table = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();
        let fetcher = table.get("run-1", "fetcher").unwrap().unwrap();
        assert_eq!(fetcher.version, 2);
        assert!(table.get("run-1", "orchestrator").unwrap().is_some());
        assert!(!dir.path().join("runs.json.tmp").exists());
    }

    #[test]
    fn failed_precondition_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileTable::open(dir.path(), "daily", Arc::new(SystemClock)).unwrap();
        table.put(row("daily", "2025-01-01"), Precondition::DoesNotExist).unwrap();
        let before = fs::metadata(table.path()).unwrap().len();
        let outcome = table
            .put(
                NewRow::encode("daily", "2025-01-01", None, &serde_json::json!({"big": "x".repeat(100)}))
                    .unwrap(),
                Precondition::DoesNotExist,
            )
            .unwrap();
        assert!(!outcome.is_written());
        assert_eq!(fs::metadata(table.path()).unwrap().len(), before);
    }

    #[test]
    fn handles_on_one_directory_keep_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();
        let b = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();

        a.put(row("run-1", "orchestrator"), Precondition::DoesNotExist).unwrap();
        b.put(row("run-2", "orchestrator"), Precondition::DoesNotExist).unwrap();
        assert!(b.get("run-1", "orchestrator").unwrap().is_some());

        let reopened = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();
        assert!(reopened.get("run-1", "orchestrator").unwrap().is_some());
        assert!(reopened.get("run-2", "orchestrator").unwrap().is_some());
    }

    #[test]
    fn version_check_sees_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();
        let b = FileTable::open(dir.path(), "runs", Arc::new(SystemClock)).unwrap();
        a.put(row("run-1", "fetcher"), Precondition::None).unwrap();

        let seen = b.get("run-1", "fetcher").unwrap().unwrap();
        assert!(a
            .put(row("run-1", "fetcher"), Precondition::MatchesVersion(seen.version))
            .unwrap()
            .is_written());

        // b still holds version 1; a already moved it to 2
        let stale = b
            .put(row("run-1", "fetcher"), Precondition::MatchesVersion(seen.version))
            .unwrap();
        assert!(!stale.is_written());
        assert_eq!(b.get("run-1", "fetcher").unwrap().unwrap().version, 2);

        assert!(b
            .put(row("run-1", "fetcher"), Precondition::DoesNotExist)
            .map(|outcome| !outcome.is_written())
            .unwrap());
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let table = FileTable::open(&path, "posts", Arc::new(SystemClock)).unwrap();
                    for i in 0..10 {
                        let sk = format!("{writer}-{i:02}");
                        table.put(row("run-1", &sk), Precondition::DoesNotExist).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let table = FileTable::open(dir.path(), "posts", Arc::new(SystemClock)).unwrap();
        let page = table.query_page("run-1", "", None, 100).unwrap();
        assert_eq!(page.rows.len(), 40);
    }

    #[test]
    fn rejects_unknown_format_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("posts.json"),
            r#"{"format_version": 99, "table": "posts", "rows": []}"#,
        )
        .unwrap();
        let result = FileTable::open(dir.path(), "posts", Arc::new(SystemClock));
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }
}
