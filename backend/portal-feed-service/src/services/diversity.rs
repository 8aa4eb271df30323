//! Diversity selector
//!
//! Picks clusters for a page under per-level quotas (channel, topic, author, source)
//! and, for feeds that need spread, a similarity penalty against the most similar
//! item already picked (MMR-style). When quotas starve the page, a relaxation ladder
//! fills the remaining slots; earlier picks are always kept.
//!
//! A pagination walk is selected page by page: every page runs the ladder over the
//! clusters no earlier page took, so page `k` only depends on pages `0..k`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::{Candidate, DiversityLevel};
use crate::services::clustering::Cluster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderStage {
    Strict,
    RelaxedChannel,
    IgnoreExclusions,
    Unconstrained,
}

impl LadderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::RelaxedChannel => "relaxed_channel",
            Self::IgnoreExclusions => "ignore_exclusions",
            Self::Unconstrained => "unconstrained",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityPolicy {
    pub channel: f64,
    pub topic: f64,
    pub author: f64,
    pub source: f64,
    pub lambda: f64,
}

impl DiversityPolicy {
    pub fn for_level(level: DiversityLevel) -> Self {
        match level {
            DiversityLevel::Low => Self {
                channel: 1.0,
                topic: 1.0,
                author: 1.0,
                source: 1.0,
                lambda: 0.10,
            },
            DiversityLevel::Med => Self {
                channel: 0.5,
                topic: 0.4,
                author: 0.4,
                source: 0.5,
                lambda: 0.30,
            },
            DiversityLevel::High => Self {
                channel: 0.3,
                topic: 0.25,
                author: 0.2,
                source: 0.3,
                lambda: 0.60,
            },
        }
    }
}

fn cap(fraction: f64, target: usize) -> usize {
    ((fraction * target as f64).ceil() as usize).max(1)
}

/// Hard caps for one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Caps {
    channel: usize,
    topic: Option<usize>,
    author: Option<usize>,
    source: Option<usize>,
}

#[derive(Default)]
struct QuotaCounts {
    channel: HashMap<String, usize>,
    topic: HashMap<String, usize>,
    author: HashMap<String, usize>,
    source: HashMap<String, usize>,
}

impl QuotaCounts {
    fn admits(&self, candidate: &Candidate, caps: &Caps) -> bool {
        let under = |counts: &HashMap<String, usize>, key: Option<&str>, cap: Option<usize>| {
            match (key, cap) {
                (Some(key), Some(cap)) => counts.get(key).copied().unwrap_or(0) < cap,
                _ => true,
            }
        };
        under(&self.channel, Some(&candidate.channel.slug), Some(caps.channel))
            && under(&self.topic, candidate.topic_slug(), caps.topic)
            && under(&self.author, candidate.author.as_deref(), caps.author)
            && under(&self.source, candidate.source.as_deref(), caps.source)
    }

    fn add(&mut self, candidate: &Candidate) {
        *self.channel.entry(candidate.channel.slug.clone()).or_default() += 1;
        if let Some(topic) = candidate.topic_slug() {
            *self.topic.entry(topic.to_string()).or_default() += 1;
        }
        if let Some(author) = &candidate.author {
            *self.author.entry(author.clone()).or_default() += 1;
        }
        if let Some(source) = &candidate.source {
            *self.source.entry(source.clone()).or_default() += 1;
        }
    }
}

/// Similarity penalty between two items
pub fn penalty(a: &Candidate, b: &Candidate) -> f64 {
    if a.channel.slug != b.channel.slug {
        return 0.0;
    }
    match (a.topic_slug(), b.topic_slug()) {
        (Some(x), Some(y)) if x == y => 1.0,
        _ => 0.5,
    }
}

/// Result of selecting one window of a walk
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Cluster indexes for the requested window, in display order
    pub picks: Vec<usize>,
    /// Loosest ladder stage any page of the walk needed
    pub stage: LadderStage,
}

#[derive(Debug, Clone, Copy)]
pub struct DiversitySelector {
    policy: DiversityPolicy,
    use_mmr: bool,
}

impl DiversitySelector {
    pub fn new(level: DiversityLevel, use_mmr: bool) -> Self {
        Self {
            policy: DiversityPolicy::for_level(level),
            use_mmr,
        }
    }

    /// Select `[offset, offset + size)` of the walk over `clusters`.
    ///
    /// `clusters` must be in ranking order. Clusters containing an excluded id are
    /// only used once the ladder reaches `IgnoreExclusions`.
    pub fn select_window(
        &self,
        clusters: &[Cluster],
        offset: usize,
        size: usize,
        excluded: &HashSet<String>,
    ) -> Selection {
        let size = size.max(1);
        let end = offset.saturating_add(size);
        let mut taken = vec![false; clusters.len()];
        let mut walk: Vec<usize> = Vec::with_capacity(end.min(clusters.len()));
        let mut stage = LadderStage::Strict;

        while walk.len() < end && walk.len() < clusters.len() {
            let (page, page_stage) = self.select_page(clusters, size, excluded, &taken);
            if page.is_empty() {
                break;
            }
            for &index in &page {
                taken[index] = true;
            }
            walk.extend(page);
            stage = stage.max(page_stage);
        }

        let picks = walk.into_iter().skip(offset).take(size).collect();
        Selection { picks, stage }
    }

    /// One page of up to `target` clusters not yet `taken`.
    pub fn select_page(
        &self,
        clusters: &[Cluster],
        target: usize,
        excluded: &HashSet<String>,
        taken: &[bool],
    ) -> (Vec<usize>, LadderStage) {
        let is_excluded: Vec<bool> = clusters
            .iter()
            .map(|c| {
                !excluded.is_empty() && c.members.iter().any(|m| excluded.contains(&m.candidate.id))
            })
            .collect();

        let strict = Caps {
            channel: cap(self.policy.channel, target),
            topic: Some(cap(self.policy.topic, target)),
            author: Some(cap(self.policy.author, target)),
            source: Some(cap(self.policy.source, target)),
        };
        let relaxed = Caps {
            channel: strict.channel.saturating_mul(2),
            topic: None,
            author: None,
            source: None,
        };

        let mut pass = PagePass::new(clusters, taken, self.policy.lambda, self.use_mmr);
        let mut stage = LadderStage::Strict;

        pass.fill(target, Some(&strict), Some(is_excluded.as_slice()));
        if pass.len() < target {
            stage = LadderStage::RelaxedChannel;
            pass.fill(target, Some(&relaxed), Some(is_excluded.as_slice()));
        }
        if pass.len() < target {
            stage = LadderStage::IgnoreExclusions;
            pass.fill(target, Some(&relaxed), None);
        }
        if pass.len() < target {
            stage = LadderStage::Unconstrained;
            pass.fill(target, None, None);
        }

        (pass.picks, stage)
    }
}

/// Greedy state for one page; later ladder stages continue from earlier picks.
struct PagePass<'a> {
    clusters: &'a [Cluster],
    available: Vec<bool>,
    picks: Vec<usize>,
    counts: QuotaCounts,
    /// Highest penalty of each cluster against anything picked on this page
    max_penalty: Vec<f64>,
    max_score: f64,
    lambda: f64,
    use_mmr: bool,
}

impl<'a> PagePass<'a> {
    fn new(clusters: &'a [Cluster], taken: &[bool], lambda: f64, use_mmr: bool) -> Self {
        let available: Vec<bool> = (0..clusters.len())
            .map(|i| !taken.get(i).copied().unwrap_or(false))
            .collect();
        let max_score = clusters
            .iter()
            .map(|c| c.representative.score)
            .fold(0.0_f64, f64::max);
        Self {
            clusters,
            available,
            picks: Vec::new(),
            counts: QuotaCounts::default(),
            max_penalty: vec![0.0; clusters.len()],
            max_score,
            lambda,
            use_mmr,
        }
    }

    fn len(&self) -> usize {
        self.picks.len()
    }

    fn eligible(&self, index: usize, caps: Option<&Caps>, excluded: Option<&[bool]>) -> bool {
        if !self.available[index] {
            return false;
        }
        if excluded.is_some_and(|e| e[index]) {
            return false;
        }
        caps.map_or(true, |caps| {
            self.counts
                .admits(&self.clusters[index].representative.candidate, caps)
        })
    }

    fn selection_score(&self, index: usize) -> f64 {
        let base = if self.max_score > 0.0 {
            self.clusters[index].representative.score / self.max_score
        } else {
            0.0
        };
        base - self.lambda * self.max_penalty[index]
    }

    fn next(&self, caps: Option<&Caps>, excluded: Option<&[bool]>) -> Option<usize> {
        let mut eligible = (0..self.clusters.len()).filter(|&i| self.eligible(i, caps, excluded));
        if !self.use_mmr {
            return eligible.next();
        }
        // Strictly greater keeps the earlier (better ranked) cluster on ties.
        eligible.fold(None, |best: Option<(usize, f64)>, i| {
            let score = self.selection_score(i);
            match best {
                Some((_, best_score)) if score <= best_score => best,
                _ => Some((i, score)),
            }
        })
        .map(|(i, _)| i)
    }

    fn take(&mut self, index: usize) {
        self.available[index] = false;
        self.picks.push(index);
        let picked = &self.clusters[index].representative.candidate;
        self.counts.add(picked);
        if self.use_mmr {
            for (i, cluster) in self.clusters.iter().enumerate() {
                if self.available[i] {
                    let p = penalty(&cluster.representative.candidate, picked);
                    if p > self.max_penalty[i] {
                        self.max_penalty[i] = p;
                    }
                }
            }
        }
    }

    fn fill(&mut self, target: usize, caps: Option<&Caps>, excluded: Option<&[bool]>) {
        while self.picks.len() < target {
            match self.next(caps, excluded) {
                Some(index) => self.take(index),
                None => break,
            }
        }
    }
}
