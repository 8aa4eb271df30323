//! Feed domain types
//!
//! Candidates are ephemeral: built per request from index hits or content store rows,
//! normalized once at the source boundary and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============= Request shape =============

/// Feed flavours served by the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Personalized feed
    Feed,
    Headlines,
    Hot,
    Topics,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Headlines => "headlines",
            Self::Hot => "hot",
            Self::Topics => "topics",
        }
    }

    /// Recency half-life in hours
    pub fn half_life_hours(&self) -> f64 {
        match self {
            Self::Hot => 6.0,
            Self::Feed | Self::Headlines | Self::Topics => 12.0,
        }
    }

    pub fn default_hours(&self) -> u32 {
        match self {
            Self::Feed => 48,
            Self::Headlines => 24,
            Self::Hot => 12,
            Self::Topics => 72,
        }
    }

    /// Feeds that spread results with similarity-penalized selection
    pub fn uses_mmr(&self) -> bool {
        matches!(self, Self::Feed | Self::Hot)
    }

    /// Shared aggregates that are worth precomputing
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Headlines | Self::Hot)
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiversityLevel {
    Low,
    #[default]
    Med,
    High,
}

impl DiversityLevel {
    /// Lenient parse: anything unrecognised is `Med`
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("low") | Some("0") => Self::Low,
            Some("high") | Some("2") => Self::High,
            _ => Self::Med,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

/// Cache content classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Breaking,
    Hot,
    Trending,
    Normal,
    Recommend,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breaking => "breaking",
            Self::Hot => "hot",
            Self::Trending => "trending",
            Self::Normal => "normal",
            Self::Recommend => "recommend",
        }
    }
}

/// Coarse request attributes; nothing here identifies a person durably
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub accept_language: Option<String>,
    pub session_cookie: Option<String>,
    /// Set by the auth layer in front of this service
    pub user_id: Option<String>,
}

impl ClientContext {
    pub fn is_anonymous(&self) -> bool {
        self.user_id.as_deref().map_or(true, str::is_empty)
    }
}

pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MIN_HOURS: u32 = 1;
pub const MAX_HOURS: u32 = 720;

#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub kind: FeedKind,
    pub site: String,
    /// Channel slugs; empty means no restriction
    pub channels: Vec<String>,
    pub hours: Option<u32>,
    pub size: usize,
    pub diversity: DiversityLevel,
    pub cursor: Option<String>,
    pub debug: bool,
    pub client: ClientContext,
}

impl FeedRequest {
    pub fn new(kind: FeedKind, site: impl Into<String>) -> Self {
        Self {
            kind,
            site: site.into(),
            channels: Vec::new(),
            hours: None,
            size: DEFAULT_PAGE_SIZE,
            diversity: DiversityLevel::Med,
            cursor: None,
            debug: false,
            client: ClientContext::default(),
        }
    }

    /// Clamp every client-controlled knob into range; never rejects.
    pub fn normalized(mut self) -> Self {
        self.size = self.size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        self.hours = self.hours.map(|h| h.clamp(MIN_HOURS, MAX_HOURS));
        let mut channels: Vec<String> = self
            .channels
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        channels.sort();
        channels.dedup();
        self.channels = channels;
        self.site = self.site.trim().to_lowercase();
        self
    }
}

// ============= Candidates =============

/// Canonical channel/topic reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
    pub slug: String,
}

impl ChannelRef {
    pub fn from_slug(slug: &str) -> Self {
        Self {
            id: slug.to_string(),
            name: slug.to_string(),
            slug: slug.to_string(),
        }
    }

    pub fn uncategorized() -> Self {
        Self::from_slug("uncategorized")
    }
}

/// Channel or topic as found upstream: a bare slug or an object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRef {
    Slug(String),
    Object {
        #[serde(default)]
        id: Option<Value>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        slug: Option<String>,
    },
}

impl RawRef {
    pub fn normalize(self) -> Option<ChannelRef> {
        match self {
            RawRef::Slug(s) => {
                let slug = slugify(&s);
                (!slug.is_empty()).then(|| ChannelRef {
                    id: slug.clone(),
                    name: s.trim().to_string(),
                    slug,
                })
            }
            RawRef::Object { id, name, slug } => {
                let id = id.and_then(value_to_id);
                let slug = slug
                    .map(|s| slugify(&s))
                    .filter(|s| !s.is_empty())
                    .or_else(|| name.as_deref().map(slugify).filter(|s| !s.is_empty()))
                    .or_else(|| id.as_deref().map(slugify).filter(|s| !s.is_empty()))?;
                Some(ChannelRef {
                    id: id.unwrap_or_else(|| slug.clone()),
                    name: name
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| slug.clone()),
                    slug,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Index,
    Fallback,
}

/// Loosely-typed upstream record, before normalization
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "url")]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, alias = "publish_time")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel: Option<RawRef>,
    #[serde(default)]
    pub topic: Option<RawRef>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub quality: Option<f64>,
    #[serde(default)]
    pub pop_1h: Option<f64>,
    #[serde(default)]
    pub pop_24h: Option<f64>,
    #[serde(default)]
    pub ctr: Option<f64>,
    #[serde(default)]
    pub is_breaking: Option<bool>,
    #[serde(default)]
    pub is_live: Option<bool>,
}

impl RawCandidate {
    /// Resolve into a typed candidate; records without id or publish time are dropped.
    pub fn normalize(self, origin: CandidateOrigin) -> Option<Candidate> {
        let id = self.id.and_then(value_to_id)?;
        let published_at = self.published_at?;
        let non_empty = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        Some(Candidate {
            id,
            title: self.title.map(|t| t.trim().to_string()).unwrap_or_default(),
            canonical_url: non_empty(self.canonical_url),
            slug: non_empty(self.slug),
            published_at,
            channel: self
                .channel
                .and_then(RawRef::normalize)
                .unwrap_or_else(ChannelRef::uncategorized),
            topic: self.topic.and_then(RawRef::normalize),
            author: non_empty(self.author),
            source: non_empty(self.source),
            quality: self
                .quality
                .filter(|q| q.is_finite())
                .map(|q| q.clamp(0.0, 1.0))
                .unwrap_or(1.0),
            pop_1h: non_negative(self.pop_1h),
            pop_24h: non_negative(self.pop_24h),
            ctr: non_negative(self.ctr).min(1.0),
            is_breaking: self.is_breaking.unwrap_or(false),
            is_live: self.is_live.unwrap_or(false),
            origin,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub canonical_url: Option<String>,
    pub slug: Option<String>,
    pub published_at: DateTime<Utc>,
    pub channel: ChannelRef,
    pub topic: Option<ChannelRef>,
    pub author: Option<String>,
    pub source: Option<String>,
    /// 0..=1, 1.0 when unknown
    pub quality: f64,
    pub pop_1h: f64,
    pub pop_24h: f64,
    pub ctr: f64,
    pub is_breaking: bool,
    pub is_live: bool,
    pub origin: CandidateOrigin,
}

impl Candidate {
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.published_at).num_seconds().max(0);
        secs as f64 / 3600.0
    }

    pub fn is_cold(&self) -> bool {
        self.pop_1h == 0.0 && self.pop_24h == 0.0
    }

    pub fn topic_slug(&self) -> Option<&str> {
        self.topic.as_ref().map(|t| t.slug.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
}

/// Short-window engagement features from the analytics store
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementFeatures {
    pub ctr_1h: Option<f64>,
}

pub type FeatureMap = HashMap<String, EngagementFeatures>;

// ============= Response shape =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub slug: Option<String>,
    pub published_at: DateTime<Utc>,
    pub channel: ChannelRef,
    pub topic: Option<ChannelRef>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub score: f64,
    /// Stable story slug shared by all members of the cluster
    pub cluster: String,
    pub more_sources: usize,
    pub is_breaking: bool,
    pub is_live: bool,
    pub origin: CandidateOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategyInfo {
    pub backend_ttl: u64,
    pub gateway_ttl: u64,
    pub cdn_ttl: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicGroup {
    pub topic: ChannelRef,
    pub clusters: Vec<String>,
    pub item_ids: Vec<String>,
}

/// Pipeline metadata attached when debugging is enabled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub origin: Option<String>,
    pub fallback_reason: Option<String>,
    pub fallback_stage: Option<String>,
    pub feature_status: Option<String>,
    pub strategy: Option<String>,
    pub strategy_reason: Option<String>,
    pub candidate_count: usize,
    pub cluster_count: usize,
    pub similarity_threshold: Option<f64>,
    pub ladder_stage: Option<String>,
    pub cache_key: Option<String>,
    pub cache_hit: bool,
    pub served_from: Option<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<String>,
    pub content_type: ContentType,
    pub cache_strategy: CacheStrategyInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_clusters: Option<Vec<TopicGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
    /// Set only when every data path failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FeedResponse {
    pub fn is_total_failure(&self) -> bool {
        self.error.is_some()
    }
}

// ============= Helpers =============

pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut dash = false;
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn value_to_id(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_negative(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0)
}
