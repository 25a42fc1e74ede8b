//! Sentiment scoring
//!
//! [`LexiconScorer`] is a small word-list scorer; anything implementing
//! [`SentimentScorer`] can replace it.

use feedline_store::{Post, SentimentSummary};
use rustc_hash::FxHashSet;

/// Scores below `-NEUTRAL_BAND` are negative, above it positive.
pub const NEUTRAL_BAND: f64 = 0.05;

pub trait SentimentScorer: Send + Sync {
    /// Score in [-1, 1].
    fn score(&self, text: &str) -> f64;
}

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "amazing", "awesome", "love", "loved", "like", "happy",
    "nice", "best", "win", "wonderful", "fantastic", "glad", "thanks", "beautiful", "cool",
    "fun", "excited", "brilliant", "perfect", "enjoy", "enjoyed", "yay",
];

const NEGATIVE: &[&str] = &[
    "bad", "terrible", "awful", "hate", "hated", "worst", "sad", "angry", "broken", "fail",
    "failed", "ugly", "boring", "annoying", "horrible", "disappointed", "wrong", "sucks",
    "poor", "lose", "lost", "crash", "bug", "slow", "ugh",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't", "cant", "can't"];

/// Word-list scorer with single-word negation.
pub struct LexiconScorer {
    positive: FxHashSet<&'static str>,
    negative: FxHashSet<&'static str>,
    negations: FxHashSet<&'static str>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            positive: POSITIVE.iter().copied().collect(),
            negative: NEGATIVE.iter().copied().collect(),
            negations: NEGATIONS.iter().copied().collect(),
        }
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .collect();

        let mut positive = 0i32;
        let mut negative = 0i32;
        for (i, word) in words.iter().enumerate() {
            let polarity = if self.positive.contains(word) {
                1
            } else if self.negative.contains(word) {
                -1
            } else {
                continue;
            };
            let negated = i > 0 && self.negations.contains(words[i - 1]);
            if (polarity > 0) != negated {
                positive += 1;
            } else {
                negative += 1;
            }
        }

        let hits = positive + negative;
        if hits == 0 {
            return 0.0;
        }
        f64::from(positive - negative) / f64::from(hits)
    }
}

/// Score every post and summarize.
pub fn summarize(posts: &[Post], scorer: &dyn SentimentScorer) -> SentimentSummary {
    let mut summary = SentimentSummary::default();
    let mut sum = 0.0;
    for post in posts {
        let score = scorer.score(&post.text).clamp(-1.0, 1.0);
        sum += score;
        summary.scored += 1;
        if score > NEUTRAL_BAND {
            summary.positive += 1;
        } else if score < -NEUTRAL_BAND {
            summary.negative += 1;
        } else {
            summary.neutral += 1;
        }
    }
    if summary.scored > 0 {
        summary.average = sum / summary.scored as f64;
    }
    summary
}
