//! Feature enrichment
//!
//! Batch lookup of short-window engagement features for index-origin candidates.
//! The analytics store is optional: any failure yields an empty map and an
//! `Unavailable` status, and scoring falls back to default feature values.

use std::sync::Arc;
use tracing::{debug, warn};

use resilience::{CircuitBreaker, CircuitBreakerError};

use crate::clients::FeatureStore;
use crate::metrics;
use crate::models::{Candidate, CandidateOrigin, FeatureMap, FeedKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureStatus {
    Available,
    Unavailable(String),
    /// Nothing to look up (no index-origin candidates, or the feed ignores features)
    Skipped,
}

impl FeatureStatus {
    pub fn describe(&self) -> String {
        match self {
            Self::Available => "available".to_string(),
            Self::Unavailable(reason) => format!("unavailable: {}", reason),
            Self::Skipped => "skipped".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureOutcome {
    pub features: FeatureMap,
    pub status: FeatureStatus,
}

impl FeatureOutcome {
    fn empty(status: FeatureStatus) -> Self {
        Self {
            features: FeatureMap::new(),
            status,
        }
    }
}

#[derive(Clone)]
pub struct FeatureEnricher {
    store: Arc<dyn FeatureStore>,
    breaker: CircuitBreaker,
}

impl FeatureEnricher {
    pub fn new(store: Arc<dyn FeatureStore>, breaker: CircuitBreaker) -> Self {
        Self { store, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn enrich(
        &self,
        kind: FeedKind,
        site: &str,
        candidates: &[Candidate],
    ) -> FeatureOutcome {
        // Only the personalized formula reads engagement features.
        if kind != FeedKind::Feed {
            return FeatureOutcome::empty(FeatureStatus::Skipped);
        }

        let ids: Vec<String> = candidates
            .iter()
            .filter(|c| c.origin == CandidateOrigin::Index)
            .map(|c| c.id.clone())
            .collect();
        if ids.is_empty() {
            return FeatureOutcome::empty(FeatureStatus::Skipped);
        }

        match self.breaker.call(|| self.store.lookup(site, &ids)).await {
            Ok(features) => {
                debug!(site, requested = ids.len(), found = features.len(), "Features enriched");
                FeatureOutcome {
                    features,
                    status: FeatureStatus::Available,
                }
            }
            Err(CircuitBreakerError::Open { .. }) => {
                metrics::record_breaker_rejection(self.breaker.name());
                FeatureOutcome::empty(FeatureStatus::Unavailable("circuit open".into()))
            }
            Err(CircuitBreakerError::Inner(e)) => {
                warn!(site, error = %e, "Feature store lookup failed, using defaults");
                FeatureOutcome::empty(FeatureStatus::Unavailable(e.to_string()))
            }
        }
    }
}
