//! Post stage: format and publish the summary

use anyhow::{Context as _, Result};
use feedline_store::{RunState, RunStatus, Stage};

use crate::context::Context;

/// Longest text handed to a publisher, in characters.
pub const MAX_POST_CHARS: usize = 300;

/// Render the run summary as a short post.
pub fn format_summary(state: &RunState) -> String {
    let mut lines = Vec::new();
    match &state.summary.sentiment {
        Some(s) if s.scored > 0 => {
            lines.push(format!(
                "Last {} min: {} posts, mood {:+.2}",
                state.interval_minutes, s.scored, s.average
            ));
            lines.push(format!(
                "{} positive / {} negative / {} neutral",
                s.positive, s.negative, s.neutral
            ));
        }
        _ => lines.push(format!("Last {} min: no posts", state.interval_minutes)),
    }
    if let Some(top) = state.summary.top_posts.first() {
        lines.push(format!("Top: @{} \"{}\"", top.author, top.excerpt));
    }
    if !state.summary.top_authors.is_empty() {
        let authors: Vec<String> = state
            .summary
            .top_authors
            .iter()
            .take(3)
            .map(|a| format!("@{} ({})", a.author, a.posts))
            .collect();
        lines.push(format!("Most active: {}", authors.join(", ")));
    }

    let text = lines.join("\n");
    if text.chars().count() <= MAX_POST_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_POST_CHARS - 1).collect();
    cut.push('…');
    cut
}

pub fn run(ctx: &Context, run_id: &str) -> Result<RunState> {
    let runs = &ctx.stores.runs;
    let state = runs.advance(run_id, Stage::Poster)?;
    if let Some(reference) = &state.summary.published_ref {
        log::info!("{run_id}: already published as {reference}");
        return Ok(state);
    }

    let text = format_summary(&state);
    let reference = if ctx.dry_run() {
        log::info!("{run_id}: dry run, not publishing:\n{text}");
        None
    } else {
        let reference = ctx
            .publisher
            .publish(&text)
            .with_context(|| format!("{run_id}: publish failed"))?;
        log::info!("{run_id}: published as {reference}");
        Some(reference)
    };

    let state = runs.modify(run_id, Stage::Poster, |s| {
        s.summary.published_ref = reference.clone();
        s.status = RunStatus::Complete;
        s.error = None;
        Ok(())
    })?;
    Ok(state)
}
