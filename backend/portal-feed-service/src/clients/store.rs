use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, PgPool};
use std::time::Duration;
use tracing::{debug, error};

use resilience::{with_timeout_result, TimeoutError};

use super::{ContentStore, StoreError, StoreQuery};
use crate::models::{ChannelRef, RawCandidate, RawRef};

/// Postgres content store used for fallback retrieval
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
    timeout: Duration,
}

#[derive(Debug, sqlx::FromRow)]
struct ContentRow {
    id: String,
    title: Option<String>,
    canonical_url: Option<String>,
    slug: Option<String>,
    published_at: DateTime<Utc>,
    channel: Option<Json<Value>>,
    topic: Option<Json<Value>>,
    author: Option<String>,
    source: Option<String>,
    quality: Option<f64>,
    is_breaking: Option<bool>,
    is_live: Option<bool>,
}

impl From<ContentRow> for RawCandidate {
    fn from(row: ContentRow) -> Self {
        // Rows carry no popularity/CTR; downstream defaults apply.
        RawCandidate {
            id: Some(Value::String(row.id)),
            title: row.title,
            canonical_url: row.canonical_url,
            slug: row.slug,
            published_at: Some(row.published_at),
            channel: row.channel.and_then(|j| json_ref(j.0)),
            topic: row.topic.and_then(|j| json_ref(j.0)),
            author: row.author,
            source: row.source,
            quality: row.quality,
            is_breaking: row.is_breaking,
            is_live: row.is_live,
            ..Default::default()
        }
    }
}

fn json_ref(value: Value) -> Option<RawRef> {
    serde_json::from_value(value).ok()
}

#[derive(Debug, sqlx::FromRow)]
struct ChannelRow {
    id: String,
    name: String,
    slug: String,
}

impl PgContentStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, StoreError> {
        with_timeout_result(operation, self.timeout, fut)
            .await
            .map_err(|e| match e {
                TimeoutError::Elapsed { after, .. } => StoreError::Timeout(after),
                TimeoutError::Failed(e) => {
                    error!("Content store {} failed: {}", operation, e);
                    StoreError::Query(e.to_string())
                }
            })
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn recent_live(&self, query: &StoreQuery) -> Result<Vec<RawCandidate>, StoreError> {
        let rows = self
            .bounded(
                "recent_live",
                sqlx::query_as::<_, ContentRow>(
                    r#"
                    SELECT id, title, canonical_url, slug, published_at, channel, topic,
                           author, source, quality, is_breaking, is_live
                    FROM portal_content
                    WHERE site = $1
                      AND status = 'live'
                      AND ($2::timestamptz IS NULL OR published_at >= $2)
                    ORDER BY published_at DESC, id ASC
                    LIMIT $3
                    "#,
                )
                .bind(&query.site)
                .bind(query.since)
                .bind(query.limit as i64)
                .fetch_all(&self.pool),
            )
            .await?;

        debug!(
            site = %query.site,
            since = ?query.since,
            rows = rows.len(),
            "Content store scan"
        );
        Ok(rows.into_iter().map(RawCandidate::from).collect())
    }

    async fn active_channels(&self, site: &str) -> Result<Vec<ChannelRef>, StoreError> {
        let rows = self
            .bounded(
                "active_channels",
                sqlx::query_as::<_, ChannelRow>(
                    r#"
                    SELECT id, name, slug
                    FROM portal_channels
                    WHERE site = $1 AND active = TRUE
                    ORDER BY position ASC, slug ASC
                    "#,
                )
                .bind(site)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ChannelRef {
                id: row.id,
                name: row.name,
                slug: row.slug,
            })
            .collect())
    }
}
