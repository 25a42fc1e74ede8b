//! Exhaustive pagination over table reads
//!
//! [`Paged`] follows continuation tokens until the backend stops returning
//! one. Store components never call `query_page`/`scan_page` directly, so a
//! single page can't be mistaken for the whole result.

use std::collections::VecDeque;

use feedline_core::{RetryPolicy, retry_with_backoff};

use crate::table::{Page, Row, Table};
use crate::{Result, StoreError};

/// Rows requested per page. Backends may return fewer.
pub const PAGE_SIZE: usize = 100;

/// Iterator over every row of a paginated read.
///
/// Yields `Err` once and then stops if a page fails (after retries) or if
/// the backend hands back a token that does not advance.
pub struct Paged<F> {
    fetch: F,
    token: Option<String>,
    buffer: VecDeque<Row>,
    done: bool,
    pages: usize,
}

impl<F> Paged<F>
where
    F: FnMut(Option<&str>) -> Result<Page>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            token: None,
            buffer: VecDeque::new(),
            done: false,
            pages: 0,
        }
    }

    /// Pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    fn fill(&mut self) -> Result<()> {
        let page = (self.fetch)(self.token.as_deref())?;
        self.pages += 1;
        match page.next_token {
            Some(next) if self.token.as_deref() == Some(next.as_str()) => {
                return Err(StoreError::Invalid(format!(
                    "continuation token did not advance after page {}",
                    self.pages
                )));
            }
            Some(next) => self.token = Some(next),
            None => self.done = true,
        }
        self.buffer.extend(page.rows);
        Ok(())
    }
}

impl<F> Iterator for Paged<F>
where
    F: FnMut(Option<&str>) -> Result<Page>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            // Empty pages with a token are legal; keep following it.
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

/// All rows in partition `pk` whose sort key starts with `sk_prefix`.
pub fn query_all<'a>(
    table: &'a dyn Table,
    pk: &'a str,
    sk_prefix: &'a str,
    retry: RetryPolicy,
) -> Paged<impl FnMut(Option<&str>) -> Result<Page> + 'a> {
    Paged::new(move |token: Option<&str>| {
        retry_with_backoff(&format!("{}: query {pk}", table.name()), &retry, || {
            table.query_page(pk, sk_prefix, token, PAGE_SIZE)
        })
    })
}

/// Every live row in the table.
pub fn scan_all(
    table: &dyn Table,
    retry: RetryPolicy,
) -> Paged<impl FnMut(Option<&str>) -> Result<Page> + '_> {
    Paged::new(move |token: Option<&str>| {
        retry_with_backoff(&format!("{}: scan", table.name()), &retry, || {
            table.scan_page(token, PAGE_SIZE)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTable;
    use crate::table::{NewRow, Precondition};
    use feedline_core::SystemClock;
    use std::sync::Arc;

    fn table_with(rows: usize, page_limit: usize) -> MemoryTable {
        let table = MemoryTable::new("t", Arc::new(SystemClock)).with_page_limit(page_limit);
        for i in 0..rows {
            table
                .put(
                    NewRow::encode("run", format!("batch{i:04}"), None, &i).unwrap(),
                    Precondition::None,
                )
                .unwrap();
        }
        table
    }

    #[test]
    fn query_all_crosses_pages() {
        let table = table_with(25, 4);
        let mut paged = query_all(&table, "run", "batch", RetryPolicy::immediate(0));
        let rows: Vec<Row> = paged.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 25);
        assert!(paged.pages() >= 7);
        // Sort-key order preserved across pages
        let values: Vec<usize> = rows.iter().map(|r| r.decode().unwrap()).collect();
        assert_eq!(values, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn exact_multiple_of_page_size() {
        // Full last page returns a token; the next page is empty.
        let table = table_with(8, 4);
        let rows: Vec<Row> = query_all(&table, "run", "batch", RetryPolicy::immediate(0))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 8);
    }

    #[test]
    fn scan_all_crosses_pages() {
        let table = table_with(13, 5);
        let count = scan_all(&table, RetryPolicy::immediate(0)).count();
        assert_eq!(count, 13);
    }

    #[test]
    fn transient_page_failure_is_retried() {
        let table = table_with(10, 3);
        table.fail_next(1);
        let rows: Vec<Row> = query_all(&table, "run", "batch", RetryPolicy::immediate(2))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn persistent_failure_surfaces() {
        let table = table_with(10, 3);
        table.fail_next(5);
        let result: Result<Vec<Row>> =
            query_all(&table, "run", "batch", RetryPolicy::immediate(1)).collect();
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn stuck_token_is_an_error() {
        let mut calls = 0;
        let paged = Paged::new(|_token: Option<&str>| {
            calls += 1;
            Ok(Page {
                rows: Vec::new(),
                next_token: Some("same".to_string()),
            })
        });
        let result: Result<Vec<Row>> = paged.collect();
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert_eq!(calls, 2);
    }
}
