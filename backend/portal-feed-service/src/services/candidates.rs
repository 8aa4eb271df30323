//! Candidate source with content store fallback
//!
//! Primary path: filtered query against the content index through its circuit breaker.
//! When the breaker is open, the query fails, or it comes back empty, the content
//! store is scanned instead with a widening ladder:
//! 1. Windowed: live content inside the requested window
//! 2. Widened: at least the last 7 days
//! 3. Unfiltered: most recent live content, no time filter
//!
//! Fallback rows carry no popularity or CTR, so scoring sees defaults for them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use resilience::{CircuitBreaker, CircuitBreakerError};

use crate::clients::{ContentIndex, ContentStore, IndexQuery, StoreError, StoreQuery};
use crate::metrics;
use crate::models::{Candidate, CandidateOrigin, RawCandidate};

/// Minimum window for the widened fallback stage
pub const WIDENED_WINDOW_HOURS: u32 = 168;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    BreakerOpen,
    IndexError,
    IndexEmpty,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BreakerOpen => "breaker_open",
            Self::IndexError => "index_error",
            Self::IndexEmpty => "index_empty",
        }
    }

    /// Whether the primary path failed, as opposed to answering with nothing
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::IndexEmpty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStage {
    Windowed,
    Widened,
    Unfiltered,
}

impl FallbackStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windowed => "windowed",
            Self::Widened => "widened",
            Self::Unfiltered => "unfiltered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    Index,
    Fallback {
        reason: FallbackReason,
        stage: FallbackStage,
    },
}

impl SourceOrigin {
    pub fn describe(&self) -> String {
        match self {
            Self::Index => "index".to_string(),
            Self::Fallback { reason, stage } => {
                format!("fallback:{}:{}", reason.as_str(), stage.as_str())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub candidates: Vec<Candidate>,
    pub origin: SourceOrigin,
    /// Set when the last fallback stage had to drop the channel filter
    pub channel_filter_dropped: bool,
}

/// The content store failed after the index path was abandoned
#[derive(Debug, Error)]
#[error("content store fallback failed ({}): {source}", .reason.as_str())]
pub struct SourceError {
    pub reason: FallbackReason,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone)]
pub struct CandidateRequest {
    pub site: String,
    /// Channel slugs; empty means unrestricted
    pub channels: Vec<String>,
    pub hours: u32,
    pub exclude_ids: Vec<String>,
    pub pool_size: usize,
    pub now: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CandidateSource {
    index: Arc<dyn ContentIndex>,
    store: Arc<dyn ContentStore>,
    breaker: CircuitBreaker,
}

fn normalize_all(raw: Vec<RawCandidate>, origin: CandidateOrigin) -> Vec<Candidate> {
    raw.into_iter()
        .filter_map(|r| r.normalize(origin))
        .collect()
}

fn matches_channels(candidate: &Candidate, channels: &[String]) -> bool {
    channels.is_empty() || channels.iter().any(|c| *c == candidate.channel.slug)
}

impl CandidateSource {
    pub fn new(
        index: Arc<dyn ContentIndex>,
        store: Arc<dyn ContentStore>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            index,
            store,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn fetch(&self, request: &CandidateRequest) -> Result<SourceOutcome, SourceError> {
        let query = IndexQuery {
            site: request.site.clone(),
            channels: request.channels.clone(),
            since: request.now - ChronoDuration::hours(i64::from(request.hours)),
            exclude_ids: request.exclude_ids.clone(),
            size: request.pool_size,
        };

        let reason = match self.breaker.call(|| self.index.search(&query)).await {
            Ok(hits) => {
                let candidates = normalize_all(hits, CandidateOrigin::Index);
                if !candidates.is_empty() {
                    debug!(site = %request.site, count = candidates.len(), "Candidates from index");
                    return Ok(SourceOutcome {
                        candidates,
                        origin: SourceOrigin::Index,
                        channel_filter_dropped: false,
                    });
                }
                FallbackReason::IndexEmpty
            }
            Err(CircuitBreakerError::Open { retry_after, .. }) => {
                metrics::record_breaker_rejection(self.breaker.name());
                debug!(?retry_after, "Index breaker open, going straight to fallback");
                FallbackReason::BreakerOpen
            }
            Err(CircuitBreakerError::Inner(e)) => {
                warn!(site = %request.site, error = %e, "Content index query failed");
                FallbackReason::IndexError
            }
        };

        self.fallback(request, reason).await
    }

    async fn fallback(
        &self,
        request: &CandidateRequest,
        reason: FallbackReason,
    ) -> Result<SourceOutcome, SourceError> {
        let mut stages = vec![(
            FallbackStage::Windowed,
            Some(request.now - ChronoDuration::hours(i64::from(request.hours))),
        )];
        let widened = request.hours.max(WIDENED_WINDOW_HOURS);
        if widened != request.hours {
            stages.push((
                FallbackStage::Widened,
                Some(request.now - ChronoDuration::hours(i64::from(widened))),
            ));
        }
        stages.push((FallbackStage::Unfiltered, None));

        let mut reached = FallbackStage::Windowed;
        for (stage, since) in stages {
            reached = stage;
            let rows = self
                .store
                .recent_live(&StoreQuery {
                    site: request.site.clone(),
                    since,
                    limit: request.pool_size,
                })
                .await
                .map_err(|source| {
                    warn!(stage = stage.as_str(), error = %source, "Content store fallback failed");
                    SourceError { reason, source }
                })?;

            let all = normalize_all(rows, CandidateOrigin::Fallback);
            let (filtered, others): (Vec<Candidate>, Vec<Candidate>) = all
                .into_iter()
                .partition(|c| matches_channels(c, &request.channels));

            if !filtered.is_empty() {
                return Ok(self.fallback_outcome(request, filtered, reason, stage, false));
            }
            if stage == FallbackStage::Unfiltered && !others.is_empty() {
                return Ok(self.fallback_outcome(request, others, reason, stage, true));
            }
            debug!(stage = stage.as_str(), "Fallback stage empty");
        }

        metrics::record_fallback(reason.as_str(), reached.as_str());
        info!(site = %request.site, reason = reason.as_str(), "No candidates after all fallbacks");
        Ok(SourceOutcome {
            candidates: Vec::new(),
            origin: SourceOrigin::Fallback {
                reason,
                stage: reached,
            },
            channel_filter_dropped: false,
        })
    }

    fn fallback_outcome(
        &self,
        request: &CandidateRequest,
        candidates: Vec<Candidate>,
        reason: FallbackReason,
        stage: FallbackStage,
        channel_filter_dropped: bool,
    ) -> SourceOutcome {
        metrics::record_fallback(reason.as_str(), stage.as_str());
        info!(
            site = %request.site,
            reason = reason.as_str(),
            stage = stage.as_str(),
            count = candidates.len(),
            channel_filter_dropped,
            "Candidates from content store fallback"
        );
        SourceOutcome {
            candidates,
            origin: SourceOrigin::Fallback { reason, stage },
            channel_filter_dropped,
        }
    }

    /// Single store query for lightweight aggregate responses; no index, no ladder.
    pub async fn recent(&self, request: &CandidateRequest) -> Result<Vec<Candidate>, StoreError> {
        let rows = self
            .store
            .recent_live(&StoreQuery {
                site: request.site.clone(),
                since: Some(request.now - ChronoDuration::hours(i64::from(request.hours))),
                limit: request.pool_size,
            })
            .await?;
        Ok(normalize_all(rows, CandidateOrigin::Fallback)
            .into_iter()
            .filter(|c| matches_channels(c, &request.channels))
            .collect())
    }
}
