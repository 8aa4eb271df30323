//! Integration Tests: Feed Assembly
//!
//! Runs whole requests through `FeedAssembler` against in-memory collaborators.
//!
//! Coverage:
//! - Quota behaviour at low diversity and the relaxation floor
//! - URL and title clustering with representative selection
//! - Content store fallback ladder (windowed → widened → unfiltered)
//! - Cursor pagination, seen-set exclusion and walk stability
//! - Breaker state shared between instances through the cache
//! - Headline/hot aggregate precompute, sync and async
//! - Walk state carried by cursors (inline seen ids, lightweight ranking)
//! - Degraded features, profiler outages and total failure reporting

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use portal_feed::cache::{MemoryCache, SharedCache};
use portal_feed::models::{
    ClientContext, DebugInfo, DiversityLevel, FeedKind, FeedRequest, FeedResponse,
};
use portal_feed::testing::{raw, spread, FailingCache, Fixture, StaticFeatureStore};
use portal_feed::{Config, FeedAssembler};
use resilience::CircuitState;

const CHANNELS: [&str; 3] = ["politics", "sports", "tech"];

fn build(fixture: &Fixture, cache: Arc<dyn SharedCache>) -> FeedAssembler {
    FeedAssembler::new(fixture.dependencies(cache), &Config::default())
}

fn build_with(
    fixture: &Fixture,
    cache: Arc<dyn SharedCache>,
    tweak: impl FnOnce(&mut Config),
) -> FeedAssembler {
    let mut config = Config::default();
    tweak(&mut config);
    FeedAssembler::new(fixture.dependencies(cache), &config)
}

fn request(kind: FeedKind, size: usize) -> FeedRequest {
    let mut request = FeedRequest::new(kind, "main");
    request.size = size;
    request.debug = true;
    request.client = ClientContext {
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".into()),
        session_cookie: Some("session-1".into()),
        ..Default::default()
    };
    request
}

fn cursor(offset: i64, ts: Option<i64>) -> String {
    let json = match ts {
        Some(ts) => format!(r#"{{"offset":{},"ts":{}}}"#, offset, ts),
        None => format!(r#"{{"offset":{}}}"#, offset),
    };
    STANDARD.encode(json)
}

fn debug(response: &FeedResponse) -> &DebugInfo {
    response.debug.as_ref().expect("debug metadata requested")
}

fn ids(response: &FeedResponse) -> Vec<String> {
    response.items.iter().map(|i| i.id.clone()).collect()
}

#[tokio::test]
async fn test_low_diversity_single_channel_fills_page() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(10, &["politics"], now), &["politics"]);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let mut req = request(FeedKind::Feed, 5);
    req.diversity = DiversityLevel::Low;
    let response = assembler.assemble(req).await;

    assert_eq!(response.items.len(), 5);
    assert_eq!(debug(&response).ladder_stage.as_deref(), Some("strict"));
    assert!(response.next_cursor.is_some());
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_high_diversity_relaxes_to_fill_page() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(12, &["politics"], now), &["politics"]);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let mut req = request(FeedKind::Topics, 10);
    req.diversity = DiversityLevel::High;
    let response = assembler.assemble(req).await;

    assert_eq!(response.items.len(), 10);
    assert_eq!(debug(&response).ladder_stage.as_deref(), Some("unconstrained"));
}

#[tokio::test]
async fn test_same_url_collapses_to_higher_scored_representative() {
    let now = Utc::now();
    let mut newer = raw("a", "Council approves new budget", "politics", 0.5, now);
    let mut older = raw("b", "Budget vote passes after long debate", "politics", 3.0, now);
    newer.canonical_url = Some("https://portal.example/budget".into());
    older.canonical_url = Some("https://portal.example/budget".into());
    let fixture = Fixture::new(vec![newer, older], &["politics"]);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Topics, 10)).await;

    assert_eq!(ids(&response), vec!["a".to_string()]);
    assert_eq!(response.items[0].more_sources, 1);
    assert_eq!(debug(&response).cluster_count, 1);
    assert_eq!(debug(&response).candidate_count, 2);
}

#[tokio::test]
async fn test_page_never_repeats_a_story() {
    let now = Utc::now();
    let mut docs = spread(6, &CHANNELS, now);
    let mut a1 = raw("dup-a1", "Storm makes landfall on the coast", "politics", 1.0, now);
    let mut a2 = raw("dup-a2", "Evacuations ordered across region", "politics", 2.0, now);
    a1.canonical_url = Some("https://portal.example/storm".into());
    a2.canonical_url = Some("https://portal.example/storm".into());
    let b1 = raw("dup-b1", "Central bank raises interest rates again", "tech", 1.5, now);
    let b2 = raw("dup-b2", "Central bank raises interest rates again!", "tech", 2.5, now);
    docs.extend([a1, a2, b1, b2]);

    let fixture = Fixture::new(docs, &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));
    let response = assembler.assemble(request(FeedKind::Topics, 20)).await;

    let returned = ids(&response);
    assert_eq!(returned.len(), 8);
    assert!(returned.contains(&"dup-a1".to_string()));
    assert!(returned.contains(&"dup-b1".to_string()));
    assert!(!returned.contains(&"dup-a2".to_string()));
    assert!(!returned.contains(&"dup-b2".to_string()));

    let clusters: HashSet<&str> = response.items.iter().map(|i| i.cluster.as_str()).collect();
    assert_eq!(clusters.len(), response.items.len());
    let urls: HashSet<Option<&str>> = response.items.iter().map(|i| i.url.as_deref()).collect();
    assert_eq!(urls.len(), response.items.len());
}

#[tokio::test]
async fn test_index_failure_falls_back_to_widened_window() {
    let now = Utc::now();
    let docs = vec![
        raw("old-1", "Harbour festival draws record crowds", "politics", 100.0, now),
        raw("old-2", "Regional rail line reopens", "sports", 110.0, now),
    ];
    let fixture = Fixture::new(docs, &CHANNELS);
    fixture.index.set_failing(true);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Topics, 10)).await;

    assert_eq!(response.items.len(), 2);
    let info = debug(&response);
    assert_eq!(info.fallback_reason.as_deref(), Some("index_error"));
    assert_eq!(info.fallback_stage.as_deref(), Some("widened"));
    assert_eq!(info.origin.as_deref(), Some("fallback:index_error:widened"));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_fallback_reaches_unfiltered_when_store_has_only_old_items() {
    let now = Utc::now();
    let docs = vec![raw("ancient", "Archive piece from last season", "politics", 300.0, now)];
    let fixture = Fixture::new(docs, &CHANNELS);
    fixture.index.set_failing(true);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Topics, 10)).await;

    assert_eq!(ids(&response), vec!["ancient".to_string()]);
    assert_eq!(debug(&response).fallback_stage.as_deref(), Some("unfiltered"));
}

#[tokio::test]
async fn test_unfiltered_fallback_drops_channel_filter() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(3, &["politics"], now), &CHANNELS);
    fixture.index.set_failing(true);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let mut req = request(FeedKind::Topics, 10);
    req.channels = vec!["sports".into()];
    let response = assembler.assemble(req).await;

    assert_eq!(response.items.len(), 3);
    let info = debug(&response);
    assert_eq!(info.fallback_stage.as_deref(), Some("unfiltered"));
    assert!(info.notes.iter().any(|n| n.contains("channel filter dropped")));
}

#[tokio::test]
async fn test_cursor_past_end_returns_short_last_page() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(25, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let mut req = request(FeedKind::Topics, 10);
    req.cursor = Some(cursor(20, None));
    let response = assembler.assemble(req).await;

    assert_eq!(response.items.len(), 5);
    assert!(response.next_cursor.is_none());
}

#[tokio::test]
async fn test_walk_pages_are_disjoint_and_complete() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(25, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));
    let ts = now.timestamp_millis();

    let mut walk = Vec::new();
    for offset in [0, 10, 20] {
        let mut req = request(FeedKind::Topics, 10);
        req.cursor = Some(cursor(offset, Some(ts)));
        walk.extend(ids(&assembler.assemble(req).await));
    }

    assert_eq!(walk.len(), 25);
    let distinct: HashSet<&String> = walk.iter().collect();
    assert_eq!(distinct.len(), 25);
}

#[tokio::test]
async fn test_feed_walk_follows_next_cursor_to_the_end() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(30, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let mut served = Vec::new();
    let mut next: Option<String> = None;
    for _ in 0..3 {
        let mut req = request(FeedKind::Feed, 10);
        req.cursor = next.take();
        let response = assembler.assemble(req).await;
        assert_eq!(response.items.len(), 10);
        served.extend(ids(&response));
        next = response.next_cursor;
        assert!(next.is_some());
    }

    let distinct: HashSet<&String> = served.iter().collect();
    assert_eq!(distinct.len(), 30);

    let mut req = request(FeedKind::Feed, 10);
    req.cursor = next;
    let last = assembler.assemble(req).await;
    assert!(last.items.is_empty());
    assert!(last.next_cursor.is_none());
}

#[tokio::test]
async fn test_new_walk_skips_items_seen_in_session() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(10, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let first = assembler.assemble(request(FeedKind::Feed, 5)).await;
    assert_eq!(first.items.len(), 5);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = assembler.assemble(request(FeedKind::Feed, 5)).await;
    assert_eq!(second.items.len(), 5);

    let seen: HashSet<String> = ids(&first).into_iter().collect();
    assert!(ids(&second).iter().all(|id| !seen.contains(id)));
}

#[tokio::test]
async fn test_inline_seen_ids_stay_excluded_for_the_whole_walk() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(15, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(FailingCache));

    let first = STANDARD.encode(format!(
        r#"{{"offset":0,"ts":{},"seen":["item-0","item-1"]}}"#,
        now.timestamp_millis()
    ));
    let mut served = Vec::new();
    let mut next = Some(first);
    for _ in 0..10 {
        let Some(cursor) = next.take() else { break };
        let mut req = request(FeedKind::Feed, 5);
        req.cursor = Some(cursor);
        let response = assembler.assemble(req).await;
        served.extend(ids(&response));
        next = response.next_cursor;
    }

    assert!(next.is_none());
    assert!(!served.iter().any(|id| id == "item-0" || id == "item-1"));
    let distinct: HashSet<&String> = served.iter().collect();
    assert_eq!(distinct.len(), served.len(), "walk repeated items: {:?}", served);
    assert_eq!(served.len(), 13);
}

#[tokio::test]
async fn test_same_inputs_produce_same_page() {
    let now = Utc::now();
    let ts = now.timestamp_millis();
    let docs = spread(40, &CHANNELS, now);

    let mut pages = Vec::new();
    for _ in 0..2 {
        let fixture = Fixture::new(docs.clone(), &CHANNELS);
        let assembler = build(&fixture, Arc::new(MemoryCache::new()));
        let mut req = request(FeedKind::Topics, 15);
        req.cursor = Some(cursor(0, Some(ts)));
        let response = assembler.assemble(req).await;
        pages.push(
            response
                .items
                .iter()
                .map(|i| (i.id.clone(), i.score, i.cluster.clone()))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(pages[0], pages[1]);
}

#[tokio::test]
async fn test_repeat_request_is_served_from_response_cache() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(8, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let first = assembler.assemble(request(FeedKind::Topics, 5)).await;
    let second = assembler.assemble(request(FeedKind::Topics, 5)).await;

    assert!(!debug(&first).cache_hit);
    assert!(debug(&second).cache_hit);
    assert_eq!(debug(&second).served_from.as_deref(), Some("response_cache"));
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(fixture.index.calls(), 1);
}

#[tokio::test]
async fn test_breaker_opens_and_is_shared_between_instances() {
    let now = Utc::now();
    let cache = MemoryCache::new();
    let fixture = Fixture::new(spread(5, &CHANNELS, now), &CHANNELS);
    fixture.index.set_failing(true);

    let first = build(&fixture, Arc::new(cache.clone()));
    let second = build(&fixture, Arc::new(cache.clone()));

    // Distinct windows keep every request off the response cache.
    for hours in 20..25 {
        let mut req = request(FeedKind::Topics, 5);
        req.hours = Some(hours);
        let response = first.assemble(req).await;
        assert_eq!(debug(&response).fallback_reason.as_deref(), Some("index_error"));
    }
    assert_eq!(fixture.index.calls(), 5);

    let mut req = request(FeedKind::Topics, 5);
    req.hours = Some(30);
    let response = second.assemble(req).await;

    assert_eq!(fixture.index.calls(), 5);
    assert_eq!(debug(&response).fallback_reason.as_deref(), Some("breaker_open"));
    assert_eq!(response.items.len(), 5);

    let states = second.dependency_states().await;
    assert!(states
        .iter()
        .any(|(name, state)| name == "content-index" && *state == CircuitState::Open));
}

#[tokio::test]
async fn test_total_failure_keeps_response_structure() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(5, &CHANNELS, now), &CHANNELS);
    fixture.index.set_failing(true);
    fixture.store.set_failing(true);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Topics, 5)).await;

    assert!(response.is_total_failure());
    assert!(response.items.is_empty());
    assert!(response.next_cursor.is_none());
    assert!(response.error.is_some());
    assert_eq!(debug(&response).fallback_reason.as_deref(), Some("index_error"));
}

#[tokio::test]
async fn test_empty_index_with_store_outage_is_empty_not_failed() {
    let fixture = Fixture::new(Vec::new(), &CHANNELS);
    fixture.store.set_failing(true);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Topics, 5)).await;

    assert!(response.items.is_empty());
    assert!(response.error.is_none());
    assert!(!response.is_total_failure());
    assert_eq!(debug(&response).fallback_reason.as_deref(), Some("index_empty"));
}

#[tokio::test]
async fn test_cache_outage_does_not_fail_requests() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(FailingCache));

    let feed = assembler.assemble(request(FeedKind::Feed, 5)).await;
    let hot = assembler.assemble(request(FeedKind::Hot, 5)).await;

    assert_eq!(feed.items.len(), 5);
    assert_eq!(hot.items.len(), 5);
}

#[tokio::test]
async fn test_feature_outage_degrades_to_recency_scoring() {
    let now = Utc::now();
    let mut fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    let features = Arc::new(StaticFeatureStore::new(&[("item-1", 0.4)], &[]));
    features.set_failing(true);
    fixture.features = features;
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Feed, 5)).await;

    assert_eq!(response.items.len(), 5);
    let status = debug(&response).feature_status.clone().unwrap_or_default();
    assert!(status.starts_with("unavailable"), "status was {status}");
}

#[tokio::test]
async fn test_features_only_looked_up_for_personalized_feed() {
    let now = Utc::now();
    let mut fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    let features = Arc::new(StaticFeatureStore::new(&[("item-1", 0.4)], &[]));
    fixture.features = features.clone();
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let topics = assembler.assemble(request(FeedKind::Topics, 5)).await;
    assert_eq!(debug(&topics).feature_status.as_deref(), Some("skipped"));
    assert_eq!(features.calls(), 0);

    let feed = assembler.assemble(request(FeedKind::Feed, 5)).await;
    assert_eq!(debug(&feed).feature_status.as_deref(), Some("available"));
    assert_eq!(features.calls(), 1);
}

#[tokio::test]
async fn test_authenticated_feed_uses_neutral_strategy() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let mut req = request(FeedKind::Feed, 5);
    req.client.user_id = Some("user-7".into());
    let response = assembler.assemble(req).await;

    assert_eq!(debug(&response).strategy.as_deref(), Some("neutral"));
    assert_eq!(response.items.len(), 5);
}

#[tokio::test]
async fn test_anonymous_feed_starts_cold() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Feed, 5)).await;

    assert_eq!(debug(&response).strategy.as_deref(), Some("cold_start"));
}

#[tokio::test]
async fn test_profiler_outage_falls_back_to_neutral() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    fixture.store.set_channels_failing(true);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Feed, 5)).await;

    let info = debug(&response);
    assert_eq!(info.strategy.as_deref(), Some("neutral"));
    assert_eq!(
        info.strategy_reason.as_deref(),
        Some("active channels unavailable")
    );
    assert_eq!(response.items.len(), 5);
}

#[tokio::test]
async fn test_hot_aggregate_is_precomputed_in_background() {
    let now = Utc::now();
    let cache = MemoryCache::new();
    let fixture = Fixture::new(spread(12, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(cache.clone()));

    let first = assembler.assemble(request(FeedKind::Hot, 5)).await;
    assert_eq!(first.items.len(), 5);
    assert_eq!(debug(&first).served_from.as_deref(), Some("lightweight"));

    for _ in 0..100 {
        if !cache.keys_with_prefix("v1:agg:hot:main:").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cache.keys_with_prefix("v1:agg:hot:main:").len(), 1);

    let second = assembler.assemble(request(FeedKind::Hot, 5)).await;
    assert_eq!(debug(&second).served_from.as_deref(), Some("aggregate"));
    assert_eq!(second.items.len(), 5);
}

#[tokio::test]
async fn test_walk_started_on_lightweight_ranking_stays_on_it() {
    let now = Utc::now();
    let cache = MemoryCache::new();
    let docs: Vec<_> = spread(15, &CHANNELS, now)
        .into_iter()
        .enumerate()
        .map(|(i, mut doc)| {
            doc.pop_24h = Some(((i * 7) % 15) as f64 * 100.0);
            doc
        })
        .collect();
    let fixture = Fixture::new(docs, &CHANNELS);
    let assembler = build(&fixture, Arc::new(cache.clone()));

    let first = assembler.assemble(request(FeedKind::Headlines, 5)).await;
    assert_eq!(debug(&first).served_from.as_deref(), Some("lightweight"));
    let mut served = ids(&first);
    let mut next = first.next_cursor.clone();

    for _ in 0..100 {
        if !cache.keys_with_prefix("v1:agg:headlines:main:").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cache.keys_with_prefix("v1:agg:headlines:main:").len(), 1);

    for _ in 0..10 {
        let Some(cursor) = next.take() else { break };
        let mut req = request(FeedKind::Headlines, 5);
        req.cursor = Some(cursor);
        let response = assembler.assemble(req).await;
        if !response.items.is_empty() {
            assert_eq!(debug(&response).served_from.as_deref(), Some("lightweight"));
        }
        served.extend(ids(&response));
        next = response.next_cursor;
    }

    assert!(next.is_none());
    let distinct: HashSet<&String> = served.iter().collect();
    assert_eq!(distinct.len(), served.len(), "walk repeated items: {:?}", served);
    assert_eq!(served.len(), 15);

    // A fresh walk moves to the precomputed ranking.
    let fresh = assembler.assemble(request(FeedKind::Headlines, 5)).await;
    assert_eq!(debug(&fresh).served_from.as_deref(), Some("aggregate"));
}

#[tokio::test]
async fn test_headlines_aggregate_computed_inline_when_async_disabled() {
    let now = Utc::now();
    let cache = MemoryCache::new();
    let fixture = Fixture::new(spread(12, &CHANNELS, now), &CHANNELS);
    let assembler = build_with(&fixture, Arc::new(cache.clone()), |config| {
        config.feed.precompute_async = false;
    });

    let response = assembler.assemble(request(FeedKind::Headlines, 5)).await;

    assert_eq!(debug(&response).served_from.as_deref(), Some("pipeline"));
    assert_eq!(response.items.len(), 5);
    assert_eq!(cache.keys_with_prefix("v1:agg:headlines:main:").len(), 1);
}

#[tokio::test]
async fn test_topics_response_groups_items_by_topic() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(9, &CHANNELS, now), &CHANNELS);
    let assembler = build(&fixture, Arc::new(MemoryCache::new()));

    let response = assembler.assemble(request(FeedKind::Topics, 9)).await;

    let groups = response.topic_clusters.expect("topic feed groups its items");
    assert_eq!(groups.len(), 3);
    let grouped: usize = groups.iter().map(|g| g.item_ids.len()).sum();
    assert_eq!(grouped, response.items.len());
}

#[tokio::test]
async fn test_debug_metadata_requires_feature_flag() {
    let now = Utc::now();
    let fixture = Fixture::new(spread(6, &CHANNELS, now), &CHANNELS);
    let assembler = build_with(&fixture, Arc::new(MemoryCache::new()), |config| {
        config.app.debug_enabled = false;
    });

    let response = assembler.assemble(request(FeedKind::Topics, 5)).await;
    assert!(response.debug.is_none());
}
