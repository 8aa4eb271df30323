//! Cache strategy engine
//!
//! Classifies a response into a content type, derives per-layer TTLs from a fixed
//! table adjusted by the site's time of day, builds deterministic cache keys, and
//! reads/writes the backend response cache. Only the backend layer is stored here;
//! the remaining layers are advertised to outer caches in `cache_strategy`.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{get_json, set_json, SharedCache};
use crate::metrics;
use crate::models::{
    CacheStrategyInfo, ContentType, DiversityLevel, FeedItem, FeedKind, FeedResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheLayer {
    Component,
    App,
    Gateway,
    Backend,
    Cdn,
}

impl CacheLayer {
    pub const ALL: [CacheLayer; 5] = [
        CacheLayer::Component,
        CacheLayer::App,
        CacheLayer::Gateway,
        CacheLayer::Backend,
        CacheLayer::Cdn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::App => "app",
            Self::Gateway => "gateway",
            Self::Backend => "backend",
            Self::Cdn => "cdn",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Component => 0,
            Self::App => 1,
            Self::Gateway => 2,
            Self::Backend => 3,
            Self::Cdn => 4,
        }
    }

    /// Upper bound after time-of-day adjustment, seconds
    pub fn ceiling(&self) -> u64 {
        match self {
            Self::Component => 600,
            Self::App | Self::Gateway => 900,
            Self::Backend => 1800,
            Self::Cdn => 3600,
        }
    }
}

pub const TTL_FLOOR_SECS: u64 = 5;

/// Base TTLs in seconds: content type × [component, app, gateway, backend, cdn]
const TTL_TABLE: [(ContentType, [u64; 5]); 5] = [
    (ContentType::Breaking, [10, 15, 15, 30, 10]),
    (ContentType::Hot, [30, 60, 60, 120, 60]),
    (ContentType::Trending, [60, 120, 120, 300, 180]),
    (ContentType::Normal, [120, 300, 300, 600, 600]),
    (ContentType::Recommend, [30, 60, 0, 60, 0]),
];

const BREAKING_CHANNELS: [&str; 4] = ["breaking", "breaking-news", "live", "live-news"];
const BREAKING_KEYWORDS: [&str; 4] = ["breaking", "live:", "突发", "快讯"];
/// Items published this recently mark the response as breaking
pub const BREAKING_RECENCY_MINUTES: i64 = 10;

pub fn base_ttl(content_type: ContentType, layer: CacheLayer) -> u64 {
    TTL_TABLE
        .iter()
        .find(|(ct, _)| *ct == content_type)
        .map(|(_, ttls)| ttls[layer.index()])
        .unwrap_or(0)
}

/// Multiplier for the site's local hour
pub fn time_of_day_factor(local_hour: u32) -> f64 {
    match local_hour {
        7..=9 | 12..=13 | 18..=22 => 0.5,
        0..=5 => 1.5,
        _ => 1.0,
    }
}

/// TTL after time-of-day adjustment; a base of 0 stays 0 (never cache).
pub fn adjusted_ttl(content_type: ContentType, layer: CacheLayer, local_hour: u32) -> u64 {
    let base = base_ttl(content_type, layer);
    if base == 0 {
        return 0;
    }
    let scaled = (base as f64 * time_of_day_factor(local_hour)).round() as u64;
    scaled.clamp(TTL_FLOOR_SECS, layer.ceiling())
}

/// Classification from the request shape alone
pub fn classify_request(
    kind: FeedKind,
    channels: &[String],
    hours: u32,
    diversity: DiversityLevel,
) -> ContentType {
    if channels
        .iter()
        .any(|c| BREAKING_CHANNELS.contains(&c.as_str()))
    {
        return ContentType::Breaking;
    }
    if kind == FeedKind::Hot || channels.iter().any(|c| c == "hot") {
        return ContentType::Hot;
    }
    if hours <= 6 || (diversity == DiversityLevel::High && kind != FeedKind::Feed) {
        return ContentType::Trending;
    }
    if kind == FeedKind::Feed {
        return ContentType::Recommend;
    }
    ContentType::Normal
}

pub fn is_breaking_item(item: &FeedItem, now: DateTime<Utc>) -> bool {
    if item.is_breaking || item.is_live {
        return true;
    }
    let title = item.title.to_lowercase();
    if BREAKING_KEYWORDS.iter().any(|k| title.contains(k)) {
        return true;
    }
    let age = now - item.published_at;
    age >= chrono::Duration::zero() && age <= chrono::Duration::minutes(BREAKING_RECENCY_MINUTES)
}

/// Upgrade to `Breaking` when any selected item looks like breaking news.
pub fn final_content_type(
    initial: ContentType,
    items: &[FeedItem],
    now: DateTime<Utc>,
) -> ContentType {
    if initial != ContentType::Breaking && items.iter().any(|i| is_breaking_item(i, now)) {
        debug!(from = initial.as_str(), "Breaking content detected, upgrading cache type");
        return ContentType::Breaking;
    }
    initial
}

fn short_hash(input: &str, len: usize) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))[..len].to_string()
}

/// Hash bucket for per-user cache entries
pub fn user_bucket(session_id: &str) -> String {
    short_hash(session_id, 8)
}

/// `v1:feed:{kind}:{content_type}:{layer}:{site}:{params_hash}[:u{bucket}]`
pub fn response_key(
    kind: FeedKind,
    content_type: ContentType,
    layer: CacheLayer,
    site: &str,
    params: &[(&str, String)],
    user_bucket: Option<&str>,
) -> String {
    let mut sorted: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    sorted.sort();
    let mut key = format!(
        "v1:feed:{}:{}:{}:{}:{}",
        kind.as_str(),
        content_type.as_str(),
        layer.as_str(),
        site,
        short_hash(&sorted.join("&"), 16)
    );
    if let Some(bucket) = user_bucket {
        key.push_str(":u");
        key.push_str(bucket);
    }
    key
}

/// Per-request cache policy bound to the site's clock
#[derive(Clone)]
pub struct CacheStrategyEngine {
    cache: Arc<dyn SharedCache>,
    site_offset: FixedOffset,
}

impl CacheStrategyEngine {
    pub fn new(cache: Arc<dyn SharedCache>, site_offset: FixedOffset) -> Self {
        Self { cache, site_offset }
    }

    fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.site_offset).hour()
    }

    pub fn ttl(&self, content_type: ContentType, layer: CacheLayer, now: DateTime<Utc>) -> u64 {
        adjusted_ttl(content_type, layer, self.local_hour(now))
    }

    pub fn strategy_info(
        &self,
        content_type: ContentType,
        now: DateTime<Utc>,
    ) -> CacheStrategyInfo {
        CacheStrategyInfo {
            backend_ttl: self.ttl(content_type, CacheLayer::Backend, now),
            gateway_ttl: self.ttl(content_type, CacheLayer::Gateway, now),
            cdn_ttl: self.ttl(content_type, CacheLayer::Cdn, now),
        }
    }

    /// Backend-layer read; a zero TTL short-circuits without touching the cache.
    pub async fn read(
        &self,
        content_type: ContentType,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<FeedResponse> {
        if self.ttl(content_type, CacheLayer::Backend, now) == 0 {
            metrics::record_cache_event("skip");
            return None;
        }

        match get_json::<FeedResponse>(self.cache.as_ref(), key).await {
            Ok(Some(response)) => {
                metrics::record_cache_event("hit");
                debug!(key, "Response cache hit");
                Some(response)
            }
            Ok(None) => {
                metrics::record_cache_event("miss");
                None
            }
            Err(e) => {
                metrics::record_cache_event("error");
                warn!(key, error = %e, "Response cache read failed, treating as miss");
                None
            }
        }
    }

    /// Backend-layer write under the final classification's TTL. Returns whether it was stored.
    pub async fn write(
        &self,
        content_type: ContentType,
        key: &str,
        response: &FeedResponse,
        now: DateTime<Utc>,
    ) -> bool {
        let ttl = self.ttl(content_type, CacheLayer::Backend, now);
        if ttl == 0 {
            metrics::record_cache_event("skip");
            return false;
        }

        match set_json(self.cache.as_ref(), key, response, Duration::from_secs(ttl)).await {
            Ok(()) => {
                metrics::record_cache_event("write");
                true
            }
            Err(e) => {
                metrics::record_cache_event("error");
                warn!(key, error = %e, "Response cache write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, MockSharedCache};
    use crate::models::{CandidateOrigin, ChannelRef};
    use chrono::TimeZone;

    fn item(title: &str, published_at: DateTime<Utc>) -> FeedItem {
        FeedItem {
            id: "1".into(),
            title: title.into(),
            url: None,
            slug: None,
            published_at,
            channel: ChannelRef::from_slug("world"),
            topic: None,
            author: None,
            source: None,
            score: 1.0,
            cluster: "abc".into(),
            more_sources: 0,
            is_breaking: false,
            is_live: false,
            origin: CandidateOrigin::Index,
        }
    }

    fn response() -> FeedResponse {
        FeedResponse {
            items: vec![],
            next_cursor: None,
            content_type: ContentType::Normal,
            cache_strategy: CacheStrategyInfo {
                backend_ttl: 600,
                gateway_ttl: 300,
                cdn_ttl: 600,
            },
            topic_clusters: None,
            debug: None,
            error: None,
        }
    }

    #[test]
    fn test_ttl_table_and_time_of_day() {
        assert_eq!(adjusted_ttl(ContentType::Normal, CacheLayer::Backend, 15), 600);
        assert_eq!(adjusted_ttl(ContentType::Normal, CacheLayer::Backend, 8), 300);
        assert_eq!(adjusted_ttl(ContentType::Normal, CacheLayer::Backend, 3), 900);
        // floor
        assert_eq!(adjusted_ttl(ContentType::Breaking, CacheLayer::Component, 20), 5);
        // ceiling
        assert_eq!(adjusted_ttl(ContentType::Normal, CacheLayer::Component, 2), 180);
        assert_eq!(adjusted_ttl(ContentType::Normal, CacheLayer::Cdn, 2), 900);
        // zero stays zero
        assert_eq!(adjusted_ttl(ContentType::Recommend, CacheLayer::Gateway, 3), 0);
        assert_eq!(adjusted_ttl(ContentType::Recommend, CacheLayer::Cdn, 15), 0);
    }

    #[test]
    fn test_request_classification() {
        let none: Vec<String> = vec![];
        assert_eq!(
            classify_request(FeedKind::Headlines, &["breaking".to_string()], 24, DiversityLevel::Med),
            ContentType::Breaking
        );
        assert_eq!(
            classify_request(FeedKind::Hot, &none, 12, DiversityLevel::Med),
            ContentType::Hot
        );
        assert_eq!(
            classify_request(FeedKind::Headlines, &none, 6, DiversityLevel::Med),
            ContentType::Trending
        );
        assert_eq!(
            classify_request(FeedKind::Topics, &none, 72, DiversityLevel::High),
            ContentType::Trending
        );
        assert_eq!(
            classify_request(FeedKind::Feed, &none, 48, DiversityLevel::High),
            ContentType::Recommend
        );
        assert_eq!(
            classify_request(FeedKind::Headlines, &none, 24, DiversityLevel::Med),
            ContentType::Normal
        );
    }

    #[test]
    fn test_breaking_detection_upgrades() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let old = now - chrono::Duration::hours(3);

        let calm = vec![item("Council meets", old)];
        assert_eq!(final_content_type(ContentType::Normal, &calm, now), ContentType::Normal);

        let keyword = vec![item("BREAKING: bridge closed", old)];
        assert_eq!(final_content_type(ContentType::Normal, &keyword, now), ContentType::Breaking);

        let cjk = vec![item("快讯 股市", old)];
        assert_eq!(final_content_type(ContentType::Hot, &cjk, now), ContentType::Breaking);

        let fresh = vec![item("Council meets", now - chrono::Duration::minutes(4))];
        assert_eq!(final_content_type(ContentType::Trending, &fresh, now), ContentType::Breaking);

        let mut flagged = item("Council meets", old);
        flagged.is_live = true;
        assert_eq!(final_content_type(ContentType::Normal, &[flagged], now), ContentType::Breaking);
    }

    #[test]
    fn test_response_key_is_order_independent() {
        let a = response_key(
            FeedKind::Headlines,
            ContentType::Normal,
            CacheLayer::Backend,
            "main",
            &[("hours", "24".into()), ("channels", "a,b".into())],
            None,
        );
        let b = response_key(
            FeedKind::Headlines,
            ContentType::Normal,
            CacheLayer::Backend,
            "main",
            &[("channels", "a,b".into()), ("hours", "24".into())],
            None,
        );
        assert_eq!(a, b);
        assert!(a.starts_with("v1:feed:headlines:normal:backend:main:"));

        let user = response_key(
            FeedKind::Feed,
            ContentType::Recommend,
            CacheLayer::Backend,
            "main",
            &[],
            Some("deadbeef"),
        );
        assert!(user.ends_with(":udeadbeef"));
    }

    #[test]
    fn test_uncacheable_layers_report_zero() {
        let engine = CacheStrategyEngine::new(
            Arc::new(MemoryCache::new()),
            FixedOffset::east_opt(0).unwrap(),
        );
        let info = engine.strategy_info(ContentType::Recommend, Utc::now());
        assert_eq!(info.gateway_ttl, 0);
        assert_eq!(info.cdn_ttl, 0);
        assert!(info.backend_ttl >= TTL_FLOOR_SECS);
    }

    #[tokio::test]
    async fn test_cache_failure_reads_as_miss() {
        let mut mock = MockSharedCache::new();
        mock.expect_get()
            .returning(|_| Err(crate::cache::CacheError::Unavailable("down".into())));
        mock.expect_set()
            .returning(|_, _, _| Err(crate::cache::CacheError::Unavailable("down".into())));
        let engine = CacheStrategyEngine::new(Arc::new(mock), FixedOffset::east_opt(0).unwrap());

        let now = Utc::now();
        assert!(engine.read(ContentType::Normal, "k", now).await.is_none());
        assert!(!engine.write(ContentType::Normal, "k", &response(), now).await);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let cache = Arc::new(MemoryCache::new());
        let engine = CacheStrategyEngine::new(cache.clone(), FixedOffset::east_opt(0).unwrap());
        let now = Utc::now();

        assert!(engine.write(ContentType::Normal, "k", &response(), now).await);
        assert_eq!(engine.read(ContentType::Normal, "k", now).await, Some(response()));
        let ttl = cache.ttl("k").unwrap();
        assert!(ttl.as_secs() <= 900);
    }
}
