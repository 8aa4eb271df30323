//! Anonymous profiler and strategy selector
//!
//! Builds a short-lived interest profile for unauthenticated traffic from three
//! signals: the device's recent channel history, the current session's activity and
//! site-wide trending channels. Identity is a one-way hash of coarse request
//! attributes; nothing ties a profile to a durable user.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{get_json, keys, set_json, CacheError, SharedCache};
use crate::clients::{ContentStore, FeatureStore};
use crate::config::FeedConfig;
use crate::models::{ChannelRef, ClientContext};
use crate::services::scoring::ChannelWeights;

pub const SESSION_WEIGHT: f64 = 0.5;
pub const HISTORY_WEIGHT: f64 = 0.3;
pub const TREND_WEIGHT: f64 = 0.2;

pub const COLD_START_BELOW: f64 = 0.3;
pub const HYBRID_BELOW: f64 = 0.7;

const SESSION_BUCKET_SECS: i64 = 30 * 60;
const TOP_PERSONAL: usize = 5;
const TOP_TRENDING: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub fingerprint: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Channel slug → interest weight, summing to 1 when non-empty
    pub interests: HashMap<String, f64>,
    /// Personal channels ordered by interest
    pub preferred_channels: Vec<String>,
    pub trending: Vec<(String, f64)>,
    pub confidence: f64,
    pub history_depth: usize,
    pub session_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ColdStart,
    Hybrid,
    Personalized,
    /// No personalization (authenticated traffic or profiler unavailable)
    Neutral,
    /// Site has no active channels
    NoChannels,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::Hybrid => "hybrid",
            Self::Personalized => "personalized",
            Self::Neutral => "neutral",
            Self::NoChannels => "no_channels",
        }
    }
}

/// What the personalized feed should ask for and how to bias scoring
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub kind: StrategyKind,
    /// Channel filter for candidate retrieval; empty means unrestricted
    pub channels: Vec<String>,
    pub weights: ChannelWeights,
    pub diversity_boost: f64,
    pub hours: u32,
    pub reason: String,
}

impl Strategy {
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            kind: StrategyKind::Neutral,
            channels: Vec::new(),
            weights: ChannelWeights::new(),
            diversity_boost: 1.0,
            hours: 48,
            reason: reason.into(),
        }
    }

    pub fn no_channels(site: &str) -> Self {
        Self {
            kind: StrategyKind::NoChannels,
            reason: format!("no active channels configured for site {}", site),
            ..Self::neutral("")
        }
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// IPv4 /24 or IPv6 /48; anything unparseable is dropped
fn coarse_ip(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or("").trim();
    match first.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}::/48", s[0], s[1], s[2])
        }
        Err(_) => String::new(),
    }
}

pub fn fingerprint(ctx: &ClientContext, site: &str) -> String {
    let ip = coarse_ip(ctx.ip.as_deref().unwrap_or(""));
    let material = [
        site,
        ctx.user_agent.as_deref().unwrap_or(""),
        ip.as_str(),
        ctx.accept_language.as_deref().unwrap_or(""),
    ]
    .join("|");
    sha256_hex(&material)[..32].to_string()
}

pub fn identify(ctx: &ClientContext, site: &str, now_secs: i64) -> DeviceIdentity {
    let fingerprint = fingerprint(ctx, site);
    let session_id = match ctx.session_cookie.as_deref().map(str::trim) {
        Some(cookie) if !cookie.is_empty() => cookie.to_string(),
        _ => {
            let bucket = now_secs.div_euclid(SESSION_BUCKET_SECS);
            sha256_hex(&format!("{}|{}", fingerprint, bucket))[..24].to_string()
        }
    };
    DeviceIdentity {
        fingerprint,
        session_id,
    }
}

pub fn confidence(history_depth: usize, session_depth: usize) -> f64 {
    let history = (history_depth as f64 / 50.0).min(1.0);
    let session = (session_depth as f64 / 10.0).min(1.0);
    (0.6 * history + 0.4 * session).min(1.0)
}

fn frequencies(slugs: &[String]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for slug in slugs {
        *counts.entry(slug.clone()).or_default() += 1.0;
    }
    normalize(counts)
}

fn normalize(mut weights: HashMap<String, f64>) -> HashMap<String, f64> {
    let total: f64 = weights.values().sum();
    if total > 0.0 {
        for value in weights.values_mut() {
            *value /= total;
        }
    }
    weights
}

/// Weighted blend of session, history and trend interests
pub fn build_profile(
    history: &[String],
    session: &[String],
    trending: Vec<(String, f64)>,
) -> UserProfile {
    let mut interests: HashMap<String, f64> = HashMap::new();
    let trend_map: HashMap<String, f64> = normalize(
        trending
            .iter()
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .cloned()
            .collect(),
    );

    for (source, weight) in [
        (frequencies(session), SESSION_WEIGHT),
        (frequencies(history), HISTORY_WEIGHT),
        (trend_map, TREND_WEIGHT),
    ] {
        for (slug, share) in source {
            *interests.entry(slug).or_default() += share * weight;
        }
    }
    let interests = normalize(interests);

    // Personal ranking ignores the site trend component.
    let mut personal: HashMap<String, f64> = HashMap::new();
    for (slug, share) in frequencies(session) {
        *personal.entry(slug).or_default() += share * SESSION_WEIGHT;
    }
    for (slug, share) in frequencies(history) {
        *personal.entry(slug).or_default() += share * HISTORY_WEIGHT;
    }
    let mut preferred: Vec<(String, f64)> = personal.into_iter().collect();
    preferred.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    UserProfile {
        interests,
        preferred_channels: preferred.into_iter().map(|(slug, _)| slug).collect(),
        trending,
        confidence: confidence(history.len(), session.len()),
        history_depth: history.len(),
        session_depth: session.len(),
    }
}

/// Pick a strategy for a profile against the site's active channels.
pub fn select_strategy(profile: &UserProfile, active: &[ChannelRef], site: &str) -> Strategy {
    if active.is_empty() {
        return Strategy::no_channels(site);
    }
    let is_active = |slug: &str| active.iter().any(|c| c.slug == slug);

    let personal: Vec<String> = profile
        .preferred_channels
        .iter()
        .filter(|s| is_active(s.as_str()))
        .take(TOP_PERSONAL)
        .cloned()
        .collect();

    let cold_start = || {
        let uniform = 1.0 / active.len() as f64;
        Strategy {
            kind: StrategyKind::ColdStart,
            channels: active.iter().map(|c| c.slug.clone()).collect(),
            weights: active.iter().map(|c| (c.slug.clone(), uniform)).collect(),
            diversity_boost: 2.0,
            hours: 72,
            reason: format!("confidence {:.2} below {}", profile.confidence, COLD_START_BELOW),
        }
    };

    if profile.confidence < COLD_START_BELOW || personal.is_empty() {
        return cold_start();
    }

    let personal_weights: HashMap<String, f64> = normalize(
        personal
            .iter()
            .map(|s| (s.clone(), profile.interests.get(s).copied().unwrap_or(0.0)))
            .collect(),
    );

    if profile.confidence < HYBRID_BELOW {
        let trending: Vec<(String, f64)> = profile
            .trending
            .iter()
            .filter(|(s, _)| is_active(s.as_str()))
            .take(TOP_TRENDING)
            .cloned()
            .collect();
        let trend_weights = normalize(trending.iter().cloned().collect());

        let mut channels = personal.clone();
        for (slug, _) in &trending {
            if !channels.contains(slug) {
                channels.push(slug.clone());
            }
        }
        let weights: ChannelWeights = channels
            .iter()
            .map(|slug| {
                let p = personal_weights.get(slug).copied().unwrap_or(0.0);
                let t = trend_weights.get(slug).copied().unwrap_or(0.0);
                (slug.clone(), 0.6 * p + 0.4 * t)
            })
            .collect();

        return Strategy {
            kind: StrategyKind::Hybrid,
            channels,
            weights,
            diversity_boost: 1.0,
            hours: 48,
            reason: format!("confidence {:.2}", profile.confidence),
        };
    }

    Strategy {
        kind: StrategyKind::Personalized,
        channels: personal,
        weights: personal_weights,
        diversity_boost: 0.5,
        hours: 24,
        reason: format!("confidence {:.2}", profile.confidence),
    }
}

/// Stateful side of profiling: cached profiles and recorded interactions
#[derive(Clone)]
pub struct Profiler {
    cache: Arc<dyn SharedCache>,
    store: Arc<dyn ContentStore>,
    features: Arc<dyn FeatureStore>,
    config: FeedConfig,
}

impl Profiler {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        store: Arc<dyn ContentStore>,
        features: Arc<dyn FeatureStore>,
        config: FeedConfig,
    ) -> Self {
        Self {
            cache,
            store,
            features,
            config,
        }
    }

    pub fn identify(&self, ctx: &ClientContext, site: &str) -> DeviceIdentity {
        identify(ctx, site, Utc::now().timestamp())
    }

    async fn read_list(&self, key: &str) -> Vec<String> {
        match get_json::<Vec<String>>(self.cache.as_ref(), key).await {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                warn!(key, error = %e, "Profiler state unavailable");
                Vec::new()
            }
        }
    }

    /// Cached profile, rebuilt from history/session/trends on miss
    pub async fn profile(&self, identity: &DeviceIdentity, site: &str) -> UserProfile {
        let key = keys::profile(&identity.fingerprint, site);
        if let Ok(Some(profile)) = get_json::<UserProfile>(self.cache.as_ref(), &key).await {
            return profile;
        }

        let history_key = keys::device_history(&identity.fingerprint, site);
        let session_key = keys::session_activity(&identity.session_id, site);
        let (history, session, trending) = futures::join!(
            self.read_list(&history_key),
            self.read_list(&session_key),
            self.features.trending_channels(site, 10),
        );
        let trending = match trending {
            Ok(trending) => trending,
            Err(e) => {
                debug!(site, error = %e, "Trending channels unavailable");
                Vec::new()
            }
        };

        let profile = build_profile(&history, &session, trending);
        let ttl = Duration::from_secs(self.config.profile_ttl_secs);
        if let Err(e) = set_json(self.cache.as_ref(), &key, &profile, ttl).await {
            warn!(key = %key, error = %e, "Failed to cache profile");
        }
        profile
    }

    async fn active_channels(&self, site: &str) -> Result<Vec<ChannelRef>, String> {
        let key = keys::channels(site);
        if let Ok(Some(channels)) = get_json::<Vec<ChannelRef>>(self.cache.as_ref(), &key).await {
            return Ok(channels);
        }
        let channels = self
            .store
            .active_channels(site)
            .await
            .map_err(|e| e.to_string())?;
        let ttl = Duration::from_secs(self.config.profile_ttl_secs);
        if let Err(e) = set_json(self.cache.as_ref(), &key, &channels, ttl).await {
            debug!(key = %key, error = %e, "Failed to cache active channels");
        }
        Ok(channels)
    }

    /// Strategy for an anonymous request
    pub async fn strategy_for(&self, identity: &DeviceIdentity, site: &str) -> Strategy {
        let active = match self.active_channels(site).await {
            Ok(active) => active,
            Err(e) => {
                warn!(site, error = %e, "Active channels unavailable, skipping personalization");
                return Strategy::neutral("active channels unavailable");
            }
        };
        let profile = self.profile(identity, site).await;
        let strategy = select_strategy(&profile, &active, site);
        debug!(
            site,
            strategy = strategy.kind.as_str(),
            confidence = profile.confidence,
            channels = strategy.channels.len(),
            "Selected feed strategy"
        );
        strategy
    }

    async fn push_capped(
        &self,
        key: &str,
        channel: &str,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut list = get_json::<Vec<String>>(self.cache.as_ref(), key)
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        list.push(channel.to_string());
        if list.len() > cap {
            let overflow = list.len() - cap;
            list.drain(..overflow);
        }
        set_json(self.cache.as_ref(), key, &list, ttl).await
    }

    /// Record a view of `channel_slug` for the device and its session.
    pub async fn record_view(
        &self,
        ctx: &ClientContext,
        site: &str,
        channel_slug: &str,
    ) -> Result<DeviceIdentity, CacheError> {
        let identity = self.identify(ctx, site);
        let slug = crate::models::slugify(channel_slug);
        if slug.is_empty() {
            return Ok(identity);
        }

        self.push_capped(
            &keys::device_history(&identity.fingerprint, site),
            &slug,
            self.config.device_history_cap,
            Duration::from_secs(self.config.device_history_ttl_secs),
        )
        .await?;
        self.push_capped(
            &keys::session_activity(&identity.session_id, site),
            &slug,
            self.config.session_activity_cap,
            Duration::from_secs(self.config.session_activity_ttl_secs),
        )
        .await?;

        // The next request rebuilds the profile with this view included.
        if let Err(e) = self
            .cache
            .delete(&keys::profile(&identity.fingerprint, site))
            .await
        {
            debug!(error = %e, "Failed to invalidate cached profile");
        }
        Ok(identity)
    }
}
