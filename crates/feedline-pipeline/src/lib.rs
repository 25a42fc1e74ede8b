//! Feedline Pipeline - stage drivers for the feed summary pipeline
//!
//! Each stage is a plain function over a [`Context`] and a run id, meant to
//! be invoked once per serverless call. Stages share nothing but the stores.
//!
//! # Example
//!
//! ```ignore
//! use feedline_pipeline::{Config, Context, Stores, run_pipeline};
//!
//! let clock: SharedClock = Arc::new(SystemClock);
//! let stores = Stores::open(Path::new("./state"), clock.clone(), &config)?;
//! let ctx = Context::new(Config::default(), stores, clock, feed);
//! let summary = run_pipeline(&ctx, None)?;
//! println!("{}: {} posts", summary.run_id, summary.posts);
//! ```

pub mod config;
pub mod context;
pub mod publish;
pub mod runner;
pub mod sentiment;
pub mod stages;
pub mod stores;

// Re-exports
pub use config::Config;
pub use context::Context;
pub use publish::{LogPublisher, Publisher, WebhookPublisher};
pub use runner::{Summary, run_pipeline, run_stage};
pub use sentiment::{LexiconScorer, SentimentScorer, summarize};
pub use stores::Stores;
