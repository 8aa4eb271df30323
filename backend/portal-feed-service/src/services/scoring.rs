//! Scoring engine
//!
//! Pure functions: a candidate, its engagement features and a clock in, a score out.
//! Each feed kind has its own weighted sum over recency decay, log-scaled popularity,
//! burst and quality. Fully cold items (no popularity at all) get a deterministic
//! per-channel boost instead so they are neither dropped nor scored at zero.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{Candidate, EngagementFeatures, FeatureMap, FeedKind, ScoredCandidate};

/// Burst baseline: expected hourly share of the 24h count
pub const BURST_K: f64 = 1.0 / 24.0;
/// Age at which the cold-item penalty saturates (7 days)
pub const COLD_PENALTY_HOURS: f64 = 168.0;
pub const MIN_COLD_SCORE: f64 = 0.001;

pub type ChannelWeights = HashMap<String, f64>;

pub fn recency(age_hours: f64, half_life_hours: f64) -> f64 {
    0.5_f64.powf(age_hours.max(0.0) / half_life_hours)
}

pub fn burst(pop_1h: f64, pop_24h: f64) -> f64 {
    (pop_1h - BURST_K * pop_24h).max(0.0)
}

fn log1p(x: f64) -> f64 {
    x.max(0.0).ln_1p()
}

/// 32-bit FNV-1a
pub fn fnv1a(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Stable per-channel boost in [0, 0.1)
pub fn diversity_boost(channel_slug: &str) -> f64 {
    f64::from(fnv1a(channel_slug) % 1000) / 1000.0 * 0.1
}

/// Total order used everywhere a ranking is produced: score desc, title asc, id asc
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.candidate.title.cmp(&b.candidate.title))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

/// Scoring parameters fixed for one request
#[derive(Debug, Clone)]
pub struct Scorer<'a> {
    kind: FeedKind,
    now: DateTime<Utc>,
    channel_weights: Option<&'a ChannelWeights>,
    boost: f64,
}

impl<'a> Scorer<'a> {
    pub fn new(kind: FeedKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            now,
            channel_weights: None,
            boost: 1.0,
        }
    }

    /// Strategy bias; only the personalized feed uses it.
    pub fn with_strategy(mut self, weights: &'a ChannelWeights, boost: f64) -> Self {
        if self.kind == FeedKind::Feed {
            self.channel_weights = Some(weights);
            self.boost = boost.max(0.0);
        }
        self
    }

    pub fn score(&self, candidate: &Candidate, features: Option<&EngagementFeatures>) -> f64 {
        let age = candidate.age_hours(self.now);
        let rec = recency(age, self.kind.half_life_hours());

        if candidate.is_cold() {
            let penalty = 0.1 * (age / COLD_PENALTY_HOURS).min(1.0);
            let value = 0.5 * rec + 0.1 * candidate.quality
                + self.boost * diversity_boost(&candidate.channel.slug)
                - penalty;
            return value.max(MIN_COLD_SCORE);
        }

        let pop_1h = log1p(candidate.pop_1h);
        let pop_24h = log1p(candidate.pop_24h);
        let burst = log1p(burst(candidate.pop_1h, candidate.pop_24h));
        let quality = candidate.quality;

        match self.kind {
            FeedKind::Headlines => 0.40 * rec + 0.30 * pop_24h + 0.20 * burst + 0.10 * quality,
            FeedKind::Hot => 0.30 * rec + 0.20 * pop_1h + 0.40 * burst + 0.10 * quality,
            FeedKind::Topics => 0.50 * rec + 0.30 * pop_24h + 0.20 * quality,
            FeedKind::Feed => {
                let ctr = features
                    .and_then(|f| f.ctr_1h)
                    .unwrap_or(candidate.ctr)
                    .clamp(0.0, 1.0);
                let weight = self
                    .channel_weights
                    .and_then(|w| w.get(&candidate.channel.slug))
                    .copied()
                    .unwrap_or(0.0);
                0.35 * rec + 0.20 * pop_24h + 0.15 * burst + 0.15 * ctr + 0.05 * quality
                    + 0.10 * weight
            }
        }
    }

    /// Score and rank a candidate set
    pub fn score_all(
        &self,
        candidates: Vec<Candidate>,
        features: &FeatureMap,
    ) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let score = self.score(&candidate, features.get(&candidate.id));
                ScoredCandidate { candidate, score }
            })
            .collect();
        scored.sort_by(rank_order);
        scored
    }
}
