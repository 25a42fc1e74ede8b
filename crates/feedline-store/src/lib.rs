//! feedline-store: run-state coordination and batched storage
//!
//! Every stage invocation is stateless; everything that must survive between
//! invocations lives in the tables defined here. Rows are addressed by a
//! `(partition key, sort key)` pair, carry a TTL, and are only ever read
//! through [`Paged`] so no caller can mistake the first page for the whole
//! result.

pub mod error;
pub mod file;
pub mod memory;
pub mod paging;
pub mod posts;
pub mod run_state;
pub mod stage;
pub mod table;
pub mod timeseries;

pub use error::StoreError;
pub use file::FileTable;
pub use memory::MemoryTable;
pub use paging::{Paged, query_all, scan_all};
pub use posts::{Engagement, Post, PostBatch, PostStore};
pub use run_state::{
    AuthorCount, RunState, RunStateStore, RunSummary, SentimentSummary, TopPost, run_id_for,
};
pub use stage::{RunStatus, Stage};
pub use table::{NewRow, Page, Precondition, PutOutcome, Row, SharedTable, Table};
pub use timeseries::{DailyAggregate, Observation, TimeSeriesStore};

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
