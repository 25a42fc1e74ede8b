//! Aggregate stage: top-N lists, the run's observation and daily rollup

use anyhow::{Context as _, Result};
use feedline_core::Clock;
use feedline_store::{
    AuthorCount, Observation, Post, RunState, RunStatus, Stage, TopPost,
};
use rustc_hash::FxHashMap;

use super::unique_posts;
use crate::context::Context;

/// Characters of post text kept in a [`TopPost`].
const EXCERPT_CHARS: usize = 80;

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(EXCERPT_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Most engaged posts, newest first among equals.
pub fn top_posts(posts: &[Post], n: usize) -> Vec<TopPost> {
    let mut ranked: Vec<&Post> = posts.iter().collect();
    ranked.sort_by(|a, b| {
        b.engagement
            .total()
            .cmp(&a.engagement.total())
            .then(b.created_at.cmp(&a.created_at))
            .then(a.uri.cmp(&b.uri))
    });
    ranked
        .into_iter()
        .take(n)
        .map(|p| TopPost {
            uri: p.uri.clone(),
            author: p.author.clone(),
            engagement: p.engagement.total(),
            excerpt: excerpt(&p.text),
        })
        .collect()
}

/// Most active authors, by name among equals.
pub fn top_authors(posts: &[Post], n: usize) -> Vec<AuthorCount> {
    let mut counts: FxHashMap<&str, u64> = FxHashMap::default();
    for post in posts {
        *counts.entry(post.author.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<AuthorCount> = counts
        .into_iter()
        .map(|(author, posts)| AuthorCount {
            author: author.to_string(),
            posts,
        })
        .collect();
    ranked.sort_by(|a, b| b.posts.cmp(&a.posts).then(a.author.cmp(&b.author)));
    ranked.truncate(n);
    ranked
}

pub fn run(ctx: &Context, run_id: &str) -> Result<RunState> {
    let runs = &ctx.stores.runs;
    let state = runs.advance(run_id, Stage::Aggregator)?;
    let posts = unique_posts(
        ctx.stores
            .posts
            .get_all_posts(run_id)
            .with_context(|| format!("{run_id}: failed to read posts"))?,
    );

    let top_n = ctx.config.top_n;
    let top = top_posts(&posts, top_n);
    let authors = top_authors(&posts, top_n);

    let now = ctx.clock.now();
    match &state.summary.sentiment {
        Some(sentiment) if sentiment.scored > 0 => {
            ctx.stores
                .series
                .store_observation(&Observation {
                    run_id: run_id.to_string(),
                    timestamp: now,
                    value: sentiment.average,
                    count: sentiment.scored,
                })
                .with_context(|| format!("{run_id}: failed to store observation"))?;
        }
        Some(_) => log::info!("{run_id}: no posts scored, no observation recorded"),
        None => log::warn!("{run_id}: no sentiment summary, no observation recorded"),
    }

    if let Some(yesterday) = now.date_naive().pred_opt() {
        ctx.stores
            .series
            .compute_daily_aggregate(yesterday)
            .with_context(|| format!("failed to aggregate {yesterday}"))?;
    }

    let state = runs.modify(run_id, Stage::Aggregator, |s| {
        s.summary.top_posts = top.clone();
        s.summary.top_authors = authors.clone();
        s.status = RunStatus::Complete;
        s.error = None;
        Ok(())
    })?;
    log::info!(
        "{run_id}: {} top posts, {} top authors",
        state.summary.top_posts.len(),
        state.summary.top_authors.len()
    );
    Ok(state)
}
