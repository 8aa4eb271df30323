//! Feed assembler
//!
//! Runs one request through the pipeline:
//! profiler (anonymous feed only) → candidate source → feature enrichment → scoring →
//! clustering/dedup → diversity selection → page slice → response cache.
//!
//! Headlines and hot lists are shared aggregates. Their clustered ranking is kept
//! under `v1:agg:*`; on a miss the ranking is recomputed in the background while the
//! request is answered from a single content store query. A walk that started on that
//! lightweight ranking stays on it until it ends.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use resilience::{BreakerStore, CircuitBreaker, CircuitState};

use crate::cache::{get_json, set_json, CacheBreakerStore, SharedCache};
use crate::clients::{ContentIndex, ContentStore, FeatureStore, StoreError};
use crate::config::{Config, FeedConfig};
use crate::metrics;
use crate::models::{
    ContentType, DebugInfo, FeatureMap, FeedItem, FeedKind, FeedRequest, FeedResponse,
    TopicGroup, MAX_HOURS, MIN_HOURS,
};
use crate::services::cache_strategy::{
    classify_request, final_content_type, response_key, user_bucket, CacheLayer,
    CacheStrategyEngine,
};
use crate::services::candidates::{CandidateRequest, CandidateSource, SourceError, SourceOrigin};
use crate::services::clustering::{cluster, dedup_clusters, similarity_threshold, Cluster};
use crate::services::diversity::{DiversitySelector, LadderStage};
use crate::services::enrichment::{FeatureEnricher, FeatureStatus};
use crate::services::profiler::{DeviceIdentity, Profiler, Strategy};
use crate::services::scoring::Scorer;
use crate::services::session::{Cursor, SessionStore, WalkRanking};

pub const INDEX_BREAKER: &str = "content-index";
pub const FEATURE_BREAKER: &str = "feature-store";

/// External collaborators the assembler is built from
#[derive(Clone)]
pub struct FeedDependencies {
    pub index: Arc<dyn ContentIndex>,
    pub store: Arc<dyn ContentStore>,
    pub features: Arc<dyn FeatureStore>,
    pub cache: Arc<dyn SharedCache>,
}

/// Everything decided about a request before any candidate is fetched
#[derive(Debug, Clone)]
struct RequestPlan {
    request: FeedRequest,
    now: DateTime<Utc>,
    /// Scoring clock: the start of the pagination walk
    clock: DateTime<Utc>,
    cursor: Cursor,
    identity: DeviceIdentity,
    strategy: Option<Strategy>,
    hours: u32,
    /// Effective channel filter (request channels, else the strategy's)
    channels: Vec<String>,
    initial_type: ContentType,
    cache_key: String,
    debug: bool,
}

impl RequestPlan {
    fn kind(&self) -> FeedKind {
        self.request.kind
    }

    fn site(&self) -> &str {
        &self.request.site
    }

    fn new_debug(&self) -> DebugInfo {
        DebugInfo {
            strategy: self.strategy.as_ref().map(|s| s.kind.as_str().to_string()),
            strategy_reason: self.strategy.as_ref().map(|s| s.reason.clone()),
            cache_key: Some(self.cache_key.clone()),
            ..Default::default()
        }
    }
}

/// Clustered ranking for one request
struct Ranked {
    clusters: Vec<Cluster>,
    origin: String,
    fallback_reason: Option<String>,
    fallback_stage: Option<String>,
    feature_status: FeatureStatus,
    candidate_count: usize,
    threshold: f64,
    notes: Vec<String>,
}

impl Ranked {
    fn annotate(&self, debug: &mut DebugInfo) {
        debug.origin = Some(self.origin.clone());
        debug.fallback_reason = self.fallback_reason.clone();
        debug.fallback_stage = self.fallback_stage.clone();
        debug.feature_status = Some(self.feature_status.describe());
        debug.candidate_count = self.candidate_count;
        debug.cluster_count = self.clusters.len();
        debug.similarity_threshold = Some(self.threshold);
        debug.notes.extend(self.notes.iter().cloned());
    }
}

/// Precomputed headline/hot ranking shared by every request with the same shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub clusters: Vec<Cluster>,
    pub origin: String,
    pub candidate_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// `v1:agg:{kind}:{site}:{hours}:{diversity}:{channels}`
pub fn aggregate_key(
    kind: FeedKind,
    site: &str,
    hours: u32,
    diversity: &str,
    channels: &[String],
) -> String {
    let channels = if channels.is_empty() {
        "all".to_string()
    } else {
        hex::encode(Sha256::digest(channels.join(",").as_bytes()))[..12].to_string()
    };
    format!(
        "v1:agg:{}:{}:{}:{}:{}",
        kind.as_str(),
        site,
        hours,
        diversity,
        channels
    )
}

pub fn to_item(cluster: &Cluster) -> FeedItem {
    let rep = &cluster.representative;
    let c = &rep.candidate;
    FeedItem {
        id: c.id.clone(),
        title: c.title.clone(),
        url: c.canonical_url.clone(),
        slug: c.slug.clone(),
        published_at: c.published_at,
        channel: c.channel.clone(),
        topic: c.topic.clone(),
        author: c.author.clone(),
        source: c.source.clone(),
        score: rep.score,
        cluster: cluster.slug.clone(),
        more_sources: cluster.more_sources(),
        is_breaking: c.is_breaking,
        is_live: c.is_live,
        origin: c.origin,
    }
}

/// Group a page by topic (channel when an item has none), in order of first appearance.
pub fn group_by_topic(items: &[FeedItem]) -> Vec<TopicGroup> {
    let mut groups: Vec<TopicGroup> = Vec::new();
    for item in items {
        let topic = item.topic.clone().unwrap_or_else(|| item.channel.clone());
        let group = match groups.iter_mut().position(|g| g.topic.slug == topic.slug) {
            Some(index) => &mut groups[index],
            None => {
                groups.push(TopicGroup {
                    topic,
                    clusters: Vec::new(),
                    item_ids: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        if !group.clusters.contains(&item.cluster) {
            group.clusters.push(item.cluster.clone());
        }
        group.item_ids.push(item.id.clone());
    }
    groups
}

#[derive(Clone)]
pub struct FeedAssembler {
    source: CandidateSource,
    enricher: FeatureEnricher,
    sessions: SessionStore,
    cache_strategy: CacheStrategyEngine,
    profiler: Profiler,
    cache: Arc<dyn SharedCache>,
    feed: FeedConfig,
    debug_enabled: bool,
    in_flight: Arc<DashMap<String, ()>>,
}

impl FeedAssembler {
    pub fn new(deps: FeedDependencies, config: &Config) -> Self {
        let breaker_store: Arc<dyn BreakerStore> =
            Arc::new(CacheBreakerStore::new(deps.cache.clone()));
        let breaker_config = config.breaker.to_breaker_config();

        let index_breaker =
            CircuitBreaker::new(INDEX_BREAKER, breaker_config.clone(), breaker_store.clone());
        let feature_breaker = CircuitBreaker::new(FEATURE_BREAKER, breaker_config, breaker_store);

        let feed = config.feed.clone();
        Self {
            source: CandidateSource::new(deps.index, deps.store.clone(), index_breaker),
            enricher: FeatureEnricher::new(deps.features.clone(), feature_breaker),
            sessions: SessionStore::new(
                deps.cache.clone(),
                feed.seen_cap,
                Duration::from_secs(feed.seen_ttl_secs),
            ),
            cache_strategy: CacheStrategyEngine::new(deps.cache.clone(), feed.site_offset()),
            profiler: Profiler::new(deps.cache.clone(), deps.store, deps.features, feed.clone()),
            cache: deps.cache,
            feed,
            debug_enabled: config.app.debug_enabled,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Breaker states as seen through the shared cache
    pub async fn dependency_states(&self) -> Vec<(String, CircuitState)> {
        vec![
            (
                INDEX_BREAKER.to_string(),
                self.source.breaker().state().await,
            ),
            (
                FEATURE_BREAKER.to_string(),
                self.enricher.breaker().state().await,
            ),
        ]
    }

    /// Assemble one feed response. Never fails: a total data failure is reported
    /// through `FeedResponse::error` with the partial structure intact.
    pub async fn assemble(&self, request: FeedRequest) -> FeedResponse {
        let started = Instant::now();
        let request = request.normalized();
        let kind = request.kind;
        metrics::record_request(kind.as_str());

        let plan = self.plan(request).await;
        let response = self.serve(&plan).await;

        let elapsed = started.elapsed();
        metrics::record_assembly_duration(kind.as_str(), elapsed);
        info!(
            kind = kind.as_str(),
            site = %plan.site(),
            items = response.items.len(),
            content_type = response.content_type.as_str(),
            has_next = response.next_cursor.is_some(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Feed assembled"
        );
        response
    }

    async fn plan(&self, request: FeedRequest) -> RequestPlan {
        let now = Utc::now();
        let max_age = Duration::from_secs(self.feed.max_cursor_age_secs.max(0) as u64);
        let cursor = Cursor::decode(request.cursor.as_deref(), now, max_age);
        let identity = self.profiler.identify(&request.client, &request.site);

        let strategy = match request.kind {
            FeedKind::Feed if request.client.is_anonymous() => {
                Some(self.profiler.strategy_for(&identity, &request.site).await)
            }
            FeedKind::Feed => Some(Strategy::neutral("authenticated request")),
            _ => None,
        };

        let hours = request
            .hours
            .unwrap_or_else(|| {
                strategy
                    .as_ref()
                    .map_or(request.kind.default_hours(), |s| s.hours)
            })
            .clamp(MIN_HOURS, MAX_HOURS);

        let channels = if request.channels.is_empty() {
            strategy
                .as_ref()
                .map(|s| s.channels.clone())
                .unwrap_or_default()
        } else {
            request.channels.clone()
        };

        let initial_type =
            classify_request(request.kind, &request.channels, hours, request.diversity);

        let mut params: Vec<(&str, String)> = vec![
            ("channels", channels.join(",")),
            ("hours", hours.to_string()),
            ("size", request.size.to_string()),
            ("diversity", request.diversity.as_str().to_string()),
            ("offset", cursor.offset.to_string()),
        ];
        // A personalized page is only reusable within its own walk; the seen set moves
        // between walks.
        let bucket = if request.kind == FeedKind::Feed {
            params.push(("walk", cursor.ts.to_string()));
            Some(user_bucket(&identity.session_id))
        } else {
            None
        };
        let cache_key = response_key(
            request.kind,
            initial_type,
            CacheLayer::Backend,
            &request.site,
            &params,
            bucket.as_deref(),
        );

        RequestPlan {
            debug: self.debug_enabled && request.debug,
            clock: cursor.clock(),
            request,
            now,
            cursor,
            identity,
            strategy,
            hours,
            channels,
            initial_type,
            cache_key,
        }
    }

    async fn serve(&self, plan: &RequestPlan) -> FeedResponse {
        // Lightweight pages are never cached, and a cached page of the full ranking
        // would break the walk.
        let cached = if plan.cursor.ranking == WalkRanking::Lightweight {
            None
        } else {
            self.cache_strategy
                .read(plan.initial_type, &plan.cache_key, plan.now)
                .await
        };
        if let Some(mut cached) = cached {
            if plan.debug {
                let mut debug = plan.new_debug();
                debug.cache_hit = true;
                debug.served_from = Some("response_cache".into());
                cached.debug = Some(debug);
            }
            return cached;
        }

        if plan.kind().is_aggregate() {
            self.serve_aggregate(plan).await
        } else {
            self.serve_pipeline(plan).await
        }
    }

    async fn serve_pipeline(&self, plan: &RequestPlan) -> FeedResponse {
        let mut debug = plan.new_debug();

        // Seen filtering applies to the personalized feed only; the other kinds are shared.
        let seen = if plan.kind() == FeedKind::Feed {
            let mut seen = self
                .sessions
                .load(plan.site(), &plan.identity.session_id)
                .await;
            seen.merge_inline(&plan.cursor.seen);
            Some(seen)
        } else {
            None
        };
        let excluded = seen
            .as_ref()
            .map(|s| s.exclusions(plan.cursor.ts))
            .unwrap_or_default();

        let ranked = match self.rank(plan, &excluded).await {
            Ok(ranked) => ranked,
            Err(e) => return self.source_failure(plan, e, debug),
        };
        ranked.annotate(&mut debug);
        debug.served_from = Some("pipeline".into());

        let (items, next_cursor, stage) =
            self.paginate(plan, &plan.cursor, &ranked.clusters, &excluded);
        debug.ladder_stage = Some(stage.as_str().to_string());

        if let Some(seen) = seen {
            let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            if !ids.is_empty() {
                self.sessions
                    .append(
                        plan.site(),
                        &plan.identity.session_id,
                        seen,
                        &ids,
                        plan.now.timestamp_millis(),
                    )
                    .await;
            }
        }

        let response = self.build_response(plan, items, next_cursor, None);
        self.store_response(plan, &response).await;
        self.with_debug(plan, response, debug)
    }

    async fn serve_aggregate(&self, plan: &RequestPlan) -> FeedResponse {
        let mut debug = plan.new_debug();
        let key = aggregate_key(
            plan.kind(),
            plan.site(),
            plan.hours,
            plan.request.diversity.as_str(),
            &plan.channels,
        );
        let none = HashSet::new();

        if plan.cursor.ranking == WalkRanking::Lightweight {
            match self.lightweight(plan).await {
                Ok(clusters) => return self.lightweight_page(plan, &clusters, debug),
                Err(e) => warn!(error = %e, "Lightweight walk query failed, computing inline"),
            }
        }

        match get_json::<AggregateSnapshot>(self.cache.as_ref(), &key).await {
            Ok(Some(snapshot)) => {
                debug!(key = %key, clusters = snapshot.clusters.len(), "Aggregate hit");
                debug.origin = Some(snapshot.origin.clone());
                debug.candidate_count = snapshot.candidate_count;
                debug.cluster_count = snapshot.clusters.len();
                debug.served_from = Some("aggregate".into());

                let (items, next_cursor, stage) =
                    self.paginate(plan, &plan.cursor, &snapshot.clusters, &none);
                debug.ladder_stage = Some(stage.as_str().to_string());
                let response = self.build_response(plan, items, next_cursor, None);
                self.store_response(plan, &response).await;
                return self.with_debug(plan, response, debug);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Aggregate unreadable, recomputing"),
        }

        if self.feed.precompute_async {
            self.spawn_precompute(plan, key.clone());

            match self.lightweight(plan).await {
                Ok(clusters) if !clusters.is_empty() => {
                    debug
                        .notes
                        .push("aggregate recompute scheduled".to_string());
                    return self.lightweight_page(plan, &clusters, debug);
                }
                Ok(_) => debug!("Lightweight query empty, computing inline"),
                Err(e) => warn!(error = %e, "Lightweight query failed, computing inline"),
            }
        }

        let ranked = match self.rank(plan, &none).await {
            Ok(ranked) => ranked,
            Err(e) => return self.source_failure(plan, e, debug),
        };
        ranked.annotate(&mut debug);
        debug.served_from = Some("pipeline".into());
        self.store_aggregate(&key, &ranked, plan.now).await;

        let (items, next_cursor, stage) =
            self.paginate(plan, &plan.cursor, &ranked.clusters, &none);
        debug.ladder_stage = Some(stage.as_str().to_string());
        let response = self.build_response(plan, items, next_cursor, None);
        self.store_response(plan, &response).await;
        self.with_debug(plan, response, debug)
    }

    /// Page of the lightweight ranking; its next cursor keeps the walk on it.
    /// Best-effort answer, not written to the response cache.
    fn lightweight_page(
        &self,
        plan: &RequestPlan,
        clusters: &[Cluster],
        mut debug: DebugInfo,
    ) -> FeedResponse {
        debug.origin = Some("lightweight".into());
        debug.cluster_count = clusters.len();
        debug.served_from = Some("lightweight".into());

        let walk = plan.cursor.pinned(WalkRanking::Lightweight);
        let (items, next_cursor, stage) = self.paginate(plan, &walk, clusters, &HashSet::new());
        debug.ladder_stage = Some(stage.as_str().to_string());
        let response = self.build_response(plan, items, next_cursor, None);
        self.with_debug(plan, response, debug)
    }

    /// Fire-and-forget recompute of an aggregate; one in flight per key.
    fn spawn_precompute(&self, plan: &RequestPlan, key: String) {
        if self.in_flight.insert(key.clone(), ()).is_some() {
            debug!(key = %key, "Aggregate recompute already in flight");
            return;
        }

        let this = self.clone();
        let mut plan = plan.clone();
        plan.clock = plan.now;
        tokio::spawn(async move {
            match this.rank(&plan, &HashSet::new()).await {
                Ok(ranked) => this.store_aggregate(&key, &ranked, plan.now).await,
                Err(e) => warn!(key = %key, error = %e, "Aggregate recompute failed"),
            }
            this.in_flight.remove(&key);
        });
    }

    async fn store_aggregate(&self, key: &str, ranked: &Ranked, now: DateTime<Utc>) {
        if ranked.clusters.is_empty() {
            return;
        }
        let snapshot = AggregateSnapshot {
            clusters: ranked.clusters.clone(),
            origin: ranked.origin.clone(),
            candidate_count: ranked.candidate_count,
            computed_at: now,
        };
        let ttl = Duration::from_secs(self.feed.aggregate_ttl_secs);
        if let Err(e) = set_json(self.cache.as_ref(), key, &snapshot, ttl).await {
            warn!(key, error = %e, "Failed to store aggregate");
        }
    }

    fn candidate_request(
        &self,
        plan: &RequestPlan,
        excluded: &HashSet<String>,
    ) -> CandidateRequest {
        let mut exclude_ids: Vec<String> = excluded.iter().cloned().collect();
        exclude_ids.sort();
        CandidateRequest {
            site: plan.site().to_string(),
            channels: plan.channels.clone(),
            hours: plan.hours,
            exclude_ids,
            pool_size: self.feed.pool_size(plan.request.size),
            now: plan.clock,
        }
    }

    fn scorer<'a>(&self, plan: &'a RequestPlan) -> Scorer<'a> {
        let scorer = Scorer::new(plan.kind(), plan.clock);
        match &plan.strategy {
            Some(strategy) => scorer.with_strategy(&strategy.weights, strategy.diversity_boost),
            None => scorer,
        }
    }

    /// Fetch, enrich, score and cluster.
    async fn rank(
        &self,
        plan: &RequestPlan,
        excluded: &HashSet<String>,
    ) -> Result<Ranked, SourceError> {
        let request = self.candidate_request(plan, excluded);
        let outcome = self.source.fetch(&request).await?;
        let candidate_count = outcome.candidates.len();

        let features = self
            .enricher
            .enrich(plan.kind(), plan.site(), &outcome.candidates)
            .await;
        let ranked = self
            .scorer(plan)
            .score_all(outcome.candidates, &features.features);

        let threshold = similarity_threshold(plan.kind(), plan.request.diversity);
        let clusters = dedup_clusters(cluster(ranked, threshold));
        debug!(
            kind = plan.kind().as_str(),
            candidates = candidate_count,
            clusters = clusters.len(),
            threshold,
            "Ranked candidates"
        );

        let (fallback_reason, fallback_stage) = match outcome.origin {
            SourceOrigin::Index => (None, None),
            SourceOrigin::Fallback { reason, stage } => (
                Some(reason.as_str().to_string()),
                Some(stage.as_str().to_string()),
            ),
        };
        let mut notes = Vec::new();
        if outcome.channel_filter_dropped {
            notes.push("channel filter dropped at unfiltered fallback".to_string());
        }

        Ok(Ranked {
            clusters,
            origin: outcome.origin.describe(),
            fallback_reason,
            fallback_stage,
            feature_status: features.status,
            candidate_count,
            threshold,
            notes,
        })
    }

    /// One store query, scored and clustered without features.
    async fn lightweight(
        &self,
        plan: &RequestPlan,
    ) -> Result<Vec<Cluster>, StoreError> {
        let request = self.candidate_request(plan, &HashSet::new());
        let candidates = self.source.recent(&request).await?;
        let ranked = self.scorer(plan).score_all(candidates, &FeatureMap::new());
        let threshold = similarity_threshold(plan.kind(), plan.request.diversity);
        Ok(dedup_clusters(cluster(ranked, threshold)))
    }

    fn paginate(
        &self,
        plan: &RequestPlan,
        walk: &Cursor,
        clusters: &[Cluster],
        excluded: &HashSet<String>,
    ) -> (Vec<FeedItem>, Option<String>, LadderStage) {
        let size = plan.request.size;
        let selection = DiversitySelector::new(plan.request.diversity, plan.kind().uses_mmr())
            .select_window(clusters, walk.offset, size, excluded);

        let items: Vec<FeedItem> = selection
            .picks
            .iter()
            .map(|&index| to_item(&clusters[index]))
            .collect();
        // A short page is read as the end of the walk.
        let next_cursor = (items.len() == size).then(|| walk.next(size).encode());
        (items, next_cursor, selection.stage)
    }

    fn build_response(
        &self,
        plan: &RequestPlan,
        items: Vec<FeedItem>,
        next_cursor: Option<String>,
        error: Option<String>,
    ) -> FeedResponse {
        let content_type = final_content_type(plan.initial_type, &items, plan.now);
        let topic_clusters = (plan.kind() == FeedKind::Topics).then(|| group_by_topic(&items));
        FeedResponse {
            cache_strategy: self.cache_strategy.strategy_info(content_type, plan.now),
            content_type,
            items,
            next_cursor,
            topic_clusters,
            debug: None,
            error,
        }
    }

    async fn store_response(&self, plan: &RequestPlan, response: &FeedResponse) {
        if response.items.is_empty() || response.is_total_failure() {
            return;
        }
        self.cache_strategy
            .write(response.content_type, &plan.cache_key, response, plan.now)
            .await;
    }

    fn with_debug(
        &self,
        plan: &RequestPlan,
        mut response: FeedResponse,
        debug: DebugInfo,
    ) -> FeedResponse {
        if plan.debug {
            response.debug = Some(debug);
        }
        response
    }

    /// Content store failed after the index path was abandoned.
    ///
    /// An index that answered empty leaves the request valid but empty; an index that
    /// failed too means no data path is left, reported through `error`.
    fn source_failure(
        &self,
        plan: &RequestPlan,
        e: SourceError,
        mut debug: DebugInfo,
    ) -> FeedResponse {
        debug.origin = Some("none".into());
        debug.fallback_reason = Some(e.reason.as_str().to_string());
        debug.notes.push(e.to_string());

        if e.reason.is_failure() {
            error!(
                site = %plan.site(),
                kind = plan.kind().as_str(),
                error = %e,
                "All content sources failed"
            );
            let response = self.build_response(
                plan,
                Vec::new(),
                None,
                Some("content sources unavailable".to_string()),
            );
            return self.with_debug(plan, response, debug);
        }

        warn!(site = %plan.site(), error = %e, "Content store unavailable, serving empty feed");
        let response = self.build_response(plan, Vec::new(), None, None);
        self.with_debug(plan, response, debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateOrigin, ChannelRef};

    fn item(id: &str, topic: Option<&str>, channel: &str, cluster: &str) -> FeedItem {
        FeedItem {
            id: id.into(),
            title: id.into(),
            url: None,
            slug: None,
            published_at: Utc::now(),
            channel: ChannelRef::from_slug(channel),
            topic: topic.map(ChannelRef::from_slug),
            author: None,
            source: None,
            score: 1.0,
            cluster: cluster.into(),
            more_sources: 0,
            is_breaking: false,
            is_live: false,
            origin: CandidateOrigin::Index,
        }
    }

    #[test]
    fn test_group_by_topic_keeps_first_appearance_order() {
        let items = vec![
            item("1", Some("election"), "politics", "c1"),
            item("2", None, "sports", "c2"),
            item("3", Some("election"), "world", "c3"),
        ];
        let groups = group_by_topic(&items);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].topic.slug, "election");
        assert_eq!(groups[0].clusters, vec!["c1".to_string(), "c3".to_string()]);
        assert_eq!(groups[1].topic.slug, "sports");
        assert_eq!(groups[1].item_ids, vec!["2".to_string()]);
    }

    #[test]
    fn test_aggregate_key_shape() {
        assert_eq!(
            aggregate_key(FeedKind::Hot, "main", 12, "med", &[]),
            "v1:agg:hot:main:12:med:all"
        );
        let keyed = aggregate_key(FeedKind::Headlines, "main", 24, "high", &["a".into()]);
        assert!(keyed.starts_with("v1:agg:headlines:main:24:high:"));
        assert_ne!(keyed, aggregate_key(FeedKind::Headlines, "main", 24, "high", &["b".into()]));
    }
}
