//! Analyze stage: score every stored post

use anyhow::{Context as _, Result};
use feedline_store::{RunState, RunStatus, Stage};

use super::unique_posts;
use crate::context::Context;
use crate::sentiment::summarize;

pub fn run(ctx: &Context, run_id: &str) -> Result<RunState> {
    let runs = &ctx.stores.runs;
    let state = runs.advance(run_id, Stage::Analyzer)?;
    if state.has_more_posts {
        log::warn!("{run_id}: fetcher stopped with more posts available; analyzing a partial window");
    }

    let posts = ctx
        .stores
        .posts
        .get_all_posts(run_id)
        .with_context(|| format!("{run_id}: failed to read posts"))?;
    let stored = posts.len();
    let posts = unique_posts(posts);
    if posts.len() < stored {
        log::debug!("{run_id}: {} duplicate posts ignored", stored - posts.len());
    }

    let sentiment = summarize(&posts, ctx.scorer.as_ref());
    log::info!(
        "{run_id}: {} posts scored, average {:+.3} ({} positive, {} negative, {} neutral)",
        sentiment.scored,
        sentiment.average,
        sentiment.positive,
        sentiment.negative,
        sentiment.neutral
    );

    let state = runs.modify(run_id, Stage::Analyzer, |s| {
        s.summary.sentiment = Some(sentiment.clone());
        s.status = RunStatus::Complete;
        s.error = None;
        Ok(())
    })?;
    Ok(state)
}
