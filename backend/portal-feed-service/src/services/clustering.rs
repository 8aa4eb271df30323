//! Story clustering and dedup
//!
//! Greedy, score-order-dependent grouping: candidates are visited in ranking order;
//! each joins the first cluster with the same canonical URL, else the first cluster
//! whose representative title is similar enough, else seeds a new cluster. The
//! per-feed thresholds are tuned against this exact order, so the input must be the
//! ranked list from the scoring engine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use strsim::normalized_levenshtein;
use tracing::debug;

use crate::models::{DiversityLevel, FeedKind, ScoredCandidate};
use crate::services::scoring::rank_order;

pub const MIN_THRESHOLD: f64 = 0.80;
pub const MAX_THRESHOLD: f64 = 0.98;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Highest-scoring member
    pub representative: ScoredCandidate,
    /// All members in join order, representative included
    pub members: Vec<ScoredCandidate>,
    /// Stable story slug derived from the representative's normalized title
    pub slug: String,
    #[serde(skip)]
    normalized_title: String,
}

impl Cluster {
    fn seed(member: ScoredCandidate) -> Self {
        let normalized_title = normalize_title(&member.candidate.title);
        Self {
            representative: member.clone(),
            members: vec![member],
            slug: String::new(),
            normalized_title,
        }
    }

    fn join(&mut self, member: ScoredCandidate) {
        if member.score > self.representative.score {
            self.normalized_title = normalize_title(&member.candidate.title);
            self.representative = member.clone();
        }
        self.members.push(member);
    }

    pub fn more_sources(&self) -> usize {
        self.members.len().saturating_sub(1)
    }

    pub fn representative_id(&self) -> &str {
        &self.representative.candidate.id
    }
}

/// Similarity threshold for a feed kind and diversity level
pub fn similarity_threshold(kind: FeedKind, diversity: DiversityLevel) -> f64 {
    let (base, adjustment) = match kind {
        FeedKind::Headlines => (0.86, general_adjustment(diversity)),
        FeedKind::Hot => (0.88, general_adjustment(diversity)),
        FeedKind::Feed => (0.90, general_adjustment(diversity)),
        // Topic feeds keep distinct sub-stories apart at high diversity.
        FeedKind::Topics => (
            0.92,
            match diversity {
                DiversityLevel::High => 0.03,
                DiversityLevel::Med => 0.0,
                DiversityLevel::Low => -0.02,
            },
        ),
    };
    (base + adjustment).clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

fn general_adjustment(diversity: DiversityLevel) -> f64 {
    match diversity {
        DiversityLevel::High => -0.04,
        DiversityLevel::Med => 0.0,
        DiversityLevel::Low => 0.03,
    }
}

/// Lowercase, strip punctuation, collapse whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_url(url: &str) -> String {
    url.trim().to_lowercase()
}

pub fn cluster_slug(normalized_title: &str) -> String {
    let digest = Sha256::digest(normalized_title.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Canonical dedup key: url, else content slug, else id, else normalized title
pub fn dedup_key(candidate: &crate::models::Candidate) -> String {
    if let Some(url) = candidate.canonical_url.as_deref() {
        let url = normalize_url(url);
        if !url.is_empty() {
            return format!("url:{}", url);
        }
    }
    if let Some(slug) = candidate.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        return format!("slug:{}", slug.trim().to_lowercase());
    }
    if !candidate.id.is_empty() {
        return format!("id:{}", candidate.id);
    }
    format!("title:{}", normalize_title(&candidate.title))
}

/// Group ranked candidates into story clusters.
pub fn cluster(ranked: Vec<ScoredCandidate>, threshold: f64) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();

    for member in ranked {
        let url = member
            .candidate
            .canonical_url
            .as_deref()
            .map(normalize_url)
            .filter(|u| !u.is_empty());

        let url_match = url.as_ref().and_then(|u| by_url.get(u).copied());
        let target = url_match.or_else(|| {
            let title = normalize_title(&member.candidate.title);
            if title.is_empty() {
                return None;
            }
            clusters.iter().position(|c| {
                !c.normalized_title.is_empty()
                    && normalized_levenshtein(&title, &c.normalized_title) >= threshold
            })
        });

        let index = match target {
            Some(index) => {
                clusters[index].join(member);
                index
            }
            None => {
                clusters.push(Cluster::seed(member));
                clusters.len() - 1
            }
        };
        if let Some(url) = url {
            by_url.entry(url).or_insert(index);
        }
    }

    for c in clusters.iter_mut() {
        c.slug = cluster_slug(&c.normalized_title);
    }
    clusters.sort_by(|a, b| rank_order(&a.representative, &b.representative));

    debug!(clusters = clusters.len(), threshold, "Clustered candidates");
    clusters
}

/// Drop clusters whose representative repeats an earlier one's dedup key.
pub fn dedup_clusters(clusters: Vec<Cluster>) -> Vec<Cluster> {
    let mut seen = HashSet::new();
    clusters
        .into_iter()
        .filter(|c| seen.insert(dedup_key(&c.representative.candidate)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, CandidateOrigin, ChannelRef};
    use chrono::Utc;

    fn scored(id: &str, title: &str, url: Option<&str>, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                id: id.into(),
                title: title.into(),
                canonical_url: url.map(String::from),
                slug: None,
                published_at: Utc::now(),
                channel: ChannelRef::from_slug("world"),
                topic: None,
                author: None,
                source: None,
                quality: 1.0,
                pop_1h: 0.0,
                pop_24h: 0.0,
                ctr: 0.0,
                is_breaking: false,
                is_live: false,
                origin: CandidateOrigin::Index,
            },
            score,
        }
    }

    #[test]
    fn test_same_url_collapses_regardless_of_title() {
        let ranked = vec![
            scored("a", "Parliament passes budget", Some("https://x.test/budget"), 0.9),
            scored("b", "Totally different words", Some(" HTTPS://X.TEST/BUDGET "), 0.4),
        ];
        let clusters = cluster(ranked, 0.86);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].representative_id(), "a");
        assert_eq!(clusters[0].more_sources(), 1);
    }

    #[test]
    fn test_similar_titles_merge() {
        let ranked = vec![
            scored("a", "Storm hits the northern coast", None, 0.9),
            scored("b", "Storm hits the northern coast!", None, 0.8),
            scored("c", "Markets rally on rate cut", None, 0.7),
        ];
        let clusters = cluster(ranked, 0.86);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members.len(), 2);
    }

    #[test]
    fn test_higher_scoring_member_is_promoted() {
        // Unsorted input exercises the promotion rule.
        let ranked = vec![
            scored("a", "Storm hits coast", Some("https://x.test/s"), 0.2),
            scored("b", "Storm hits coast today", Some("https://x.test/s"), 0.8),
        ];
        let clusters = cluster(ranked, 0.9);
        assert_eq!(clusters[0].representative_id(), "b");
        assert_eq!(
            clusters[0].slug,
            cluster_slug(&normalize_title("Storm hits coast today"))
        );
    }

    #[test]
    fn test_clustering_is_idempotent() {
        let ranked = vec![
            scored("a", "Storm hits the northern coast", None, 0.9),
            scored("b", "Storm hits northern coast", None, 0.8),
            scored("c", "Markets rally", Some("https://x.test/m"), 0.7),
            scored("d", "Rally in markets", Some("https://x.test/m"), 0.6),
        ];
        let first = cluster(ranked.clone(), 0.86);
        let second = cluster(ranked, 0.86);
        let slugs = |cs: &[Cluster]| cs.iter().map(|c| c.slug.clone()).collect::<Vec<_>>();
        assert_eq!(slugs(&first), slugs(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_dedup_keeps_first_per_key() {
        let mut a = scored("a", "One story", None, 0.9);
        let mut b = scored("b", "Another unrelated headline", None, 0.5);
        a.candidate.slug = Some("shared-slug".into());
        b.candidate.slug = Some("Shared-Slug".into());
        let clusters = dedup_clusters(cluster(vec![a, b], 0.9));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].representative_id(), "a");
    }

    #[test]
    fn test_thresholds_per_kind_and_level() {
        assert!((similarity_threshold(FeedKind::Headlines, DiversityLevel::Med) - 0.86).abs() < 1e-9);
        assert!((similarity_threshold(FeedKind::Hot, DiversityLevel::Med) - 0.88).abs() < 1e-9);
        assert!((similarity_threshold(FeedKind::Feed, DiversityLevel::High) - 0.86).abs() < 1e-9);
        assert!((similarity_threshold(FeedKind::Topics, DiversityLevel::High) - 0.95).abs() < 1e-9);
        assert!((similarity_threshold(FeedKind::Headlines, DiversityLevel::High) - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Hello,   World!! "), "hello world");
        assert_eq!(cluster_slug("hello world").len(), 16);
    }
}
