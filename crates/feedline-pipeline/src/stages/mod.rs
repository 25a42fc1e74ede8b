//! Stage drivers, one per invocation type

pub mod aggregator;
pub mod analyzer;
pub mod fetcher;
pub mod orchestrator;
pub mod poster;

use feedline_store::Post;
use rustc_hash::FxHashSet;

/// Keep the first post per URI. Repeated fetch invocations may store the
/// same post more than once.
pub(crate) fn unique_posts(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = FxHashSet::default();
    posts
        .into_iter()
        .filter(|p| seen.insert(p.uri.clone()))
        .collect()
}
