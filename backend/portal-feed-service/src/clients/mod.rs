//! Collaborator clients
//!
//! The pipeline talks to three external systems through narrow traits:
//! - [`ContentIndex`]: filtered ranked search (primary candidate path)
//! - [`ContentStore`]: time-ordered scan of live content (fallback path)
//! - [`FeatureStore`]: short-window engagement features and site trends
//!
//! Concrete adapters own their connections and retry internally; nothing here is
//! process-global.

mod features;
mod index;
mod store;

pub use features::{DisabledFeatureStore, RedisFeatureStore};
pub use index::HttpContentIndex;
pub use store::PgContentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::models::{ChannelRef, FeatureMap, RawCandidate};

/// Filtered index query
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub site: String,
    /// Empty means no channel restriction
    pub channels: Vec<String>,
    pub since: DateTime<Utc>,
    pub exclude_ids: Vec<String>,
    pub size: usize,
}

/// Time-ordered scan of live content; `since = None` drops the time filter
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub site: String,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index transport error: {0}")]
    Transport(String),

    #[error("index returned HTTP {0}")]
    Status(u16),

    #[error("index response malformed: {0}")]
    Decode(String),

    #[error("index query timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store query failed: {0}")]
    Query(String),

    #[error("content store timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature store unavailable: {0}")]
    Unavailable(String),

    #[error("feature store timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentIndex: Send + Sync {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<RawCandidate>, IndexError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Live content newest first
    async fn recent_live(&self, query: &StoreQuery) -> Result<Vec<RawCandidate>, StoreError>;

    /// Channels currently configured for the site
    async fn active_channels(&self, site: &str) -> Result<Vec<ChannelRef>, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn lookup(&self, site: &str, ids: &[String]) -> Result<FeatureMap, FeatureError>;

    /// Site-wide trending channels with their weights, best first
    async fn trending_channels(
        &self,
        site: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, FeatureError>;
}
