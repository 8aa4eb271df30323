//! In-memory collaborators for tests and local runs
//!
//! These stand in for the index, the content store, the feature store and the
//! shared cache without any network. Each can be switched into a failing mode at
//! runtime and counts the calls it received.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cache::{CacheError, SharedCache};
use crate::clients::{
    ContentIndex, ContentStore, FeatureError, FeatureStore, IndexError, IndexQuery, StoreError,
    StoreQuery,
};
use crate::models::{
    CandidateOrigin, ChannelRef, EngagementFeatures, FeatureMap, RawCandidate, RawRef,
};

/// Raw record published `hours_ago` before `now` in `channel`
pub fn raw(
    id: &str,
    title: &str,
    channel: &str,
    hours_ago: f64,
    now: DateTime<Utc>,
) -> RawCandidate {
    RawCandidate {
        id: Some(json!(id)),
        title: Some(title.to_string()),
        canonical_url: Some(format!("https://portal.example/{}/{}", channel, id)),
        published_at: Some(now - ChronoDuration::seconds((hours_ago * 3600.0) as i64)),
        channel: Some(RawRef::Slug(channel.to_string())),
        ..Default::default()
    }
}

/// Title unlike any other generated one
pub fn distinct_title(seed: &str) -> String {
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    format!("Report {}", &digest[..24])
}

/// `count` distinct records round-robin over `channels`, half an hour apart
pub fn spread(count: usize, channels: &[&str], now: DateTime<Utc>) -> Vec<RawCandidate> {
    (0..count)
        .map(|i| {
            let id = format!("item-{i}");
            raw(
                &id,
                &distinct_title(&id),
                channels[i % channels.len()],
                i as f64 * 0.5,
                now,
            )
        })
        .collect()
}

fn channel_slug(raw: &RawCandidate) -> Option<String> {
    raw.clone()
        .normalize(CandidateOrigin::Index)
        .map(|c| c.channel.slug)
}

fn raw_id(raw: &RawCandidate) -> Option<String> {
    raw.clone()
        .normalize(CandidateOrigin::Index)
        .map(|c| c.id)
}

/// Index over a fixed document set
#[derive(Default)]
pub struct StaticContentIndex {
    docs: RwLock<Vec<RawCandidate>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticContentIndex {
    pub fn new(docs: Vec<RawCandidate>) -> Self {
        Self {
            docs: RwLock::new(docs),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_docs(&self, docs: Vec<RawCandidate>) {
        if let Ok(mut guard) = self.docs.write() {
            *guard = docs;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentIndex for StaticContentIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<RawCandidate>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(IndexError::Status(503));
        }
        let docs = self
            .docs
            .read()
            .map_err(|_| IndexError::Transport("poisoned".into()))?;

        let mut hits: Vec<RawCandidate> = docs
            .iter()
            .filter(|d| d.published_at.map_or(false, |p| p >= query.since))
            .filter(|d| {
                query.channels.is_empty()
                    || channel_slug(d).map_or(false, |s| query.channels.contains(&s))
            })
            .filter(|d| raw_id(d).map_or(true, |id| !query.exclude_ids.contains(&id)))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        hits.truncate(query.size);
        Ok(hits)
    }
}

/// Content store over a fixed document set
#[derive(Default)]
pub struct StaticContentStore {
    docs: RwLock<Vec<RawCandidate>>,
    channels: Vec<ChannelRef>,
    failing: AtomicBool,
    channels_failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticContentStore {
    pub fn new(docs: Vec<RawCandidate>, channels: &[&str]) -> Self {
        Self {
            docs: RwLock::new(docs),
            channels: channels.iter().map(|s| ChannelRef::from_slug(s)).collect(),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_channels_failing(&self, failing: bool) {
        self.channels_failing.store(failing, Ordering::SeqCst);
    }

    /// Calls to `recent_live`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for StaticContentStore {
    async fn recent_live(&self, query: &StoreQuery) -> Result<Vec<RawCandidate>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Query("connection refused".into()));
        }
        let docs = self
            .docs
            .read()
            .map_err(|_| StoreError::Query("poisoned".into()))?;

        let mut rows: Vec<RawCandidate> = docs
            .iter()
            .filter(|d| match (query.since, d.published_at) {
                (Some(since), Some(p)) => p >= since,
                (None, _) => true,
                (Some(_), None) => false,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn active_channels(&self, _site: &str) -> Result<Vec<ChannelRef>, StoreError> {
        if self.channels_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Query("channels unavailable".into()));
        }
        Ok(self.channels.clone())
    }
}

/// Feature store answering from a fixed map
#[derive(Default)]
pub struct StaticFeatureStore {
    ctr_1h: Vec<(String, f64)>,
    trending: Vec<(String, f64)>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticFeatureStore {
    pub fn new(ctr_1h: &[(&str, f64)], trending: &[(&str, f64)]) -> Self {
        Self {
            ctr_1h: ctr_1h.iter().map(|(id, v)| (id.to_string(), *v)).collect(),
            trending: trending.iter().map(|(s, v)| (s.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls to `lookup`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureStore for StaticFeatureStore {
    async fn lookup(&self, _site: &str, ids: &[String]) -> Result<FeatureMap, FeatureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeatureError::Timeout(Duration::from_secs(2)));
        }
        Ok(self
            .ctr_1h
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(id, v)| (id.clone(), EngagementFeatures { ctr_1h: Some(*v) }))
            .collect())
    }

    async fn trending_channels(
        &self,
        _site: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, FeatureError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeatureError::Unavailable("down".into()));
        }
        Ok(self.trending.iter().take(limit).cloned().collect())
    }
}

/// Shared cache that rejects every operation
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingCache;

#[async_trait]
impl SharedCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("cache offline".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache offline".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache offline".into()))
    }
}

/// Handles kept by a test next to the assembler built from them
pub struct Fixture {
    pub index: Arc<StaticContentIndex>,
    pub store: Arc<StaticContentStore>,
    pub features: Arc<StaticFeatureStore>,
}

impl Fixture {
    pub fn new(docs: Vec<RawCandidate>, channels: &[&str]) -> Self {
        Self {
            index: Arc::new(StaticContentIndex::new(docs.clone())),
            store: Arc::new(StaticContentStore::new(docs, channels)),
            features: Arc::new(StaticFeatureStore::default()),
        }
    }

    pub fn dependencies(&self, cache: Arc<dyn SharedCache>) -> crate::services::FeedDependencies {
        crate::services::FeedDependencies {
            index: self.index.clone(),
            store: self.store.clone(),
            features: self.features.clone(),
            cache,
        }
    }
}
