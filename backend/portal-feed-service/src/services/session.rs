//! Pagination cursor and per-session seen set
//!
//! Cursors are opaque base64 JSON `{"offset", "ts", "seen"?, "ranking"?}`. `ts` marks
//! the start of a pagination walk and doubles as the scoring clock for every page of it.
//! `seen` and `ranking` are fixed for the whole walk and carried into every next cursor.
//! Decoding never fails; anything unusable starts a fresh walk at offset 0.
//!
//! The seen set lives in the shared cache under `v1:seen:{site}:{session}` as
//! `{id, at}` entries, oldest first. Only entries seen before the current walk
//! started are excluded, so a walk's own pages never shift its offsets.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{get_json, keys, set_json, SharedCache};

/// Which ranking a walk pages through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkRanking {
    #[default]
    Full,
    /// Single content store query served while an aggregate is recomputed
    Lightweight,
}

impl WalkRanking {
    pub fn is_full(&self) -> bool {
        *self == WalkRanking::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
    /// Walk start, epoch milliseconds
    pub ts: i64,
    /// Client-carried seen ids for deployments without session affinity
    pub seen: Vec<String>,
    pub ranking: WalkRanking,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    seen: Vec<String>,
    #[serde(default, skip_serializing_if = "WalkRanking::is_full")]
    ranking: WalkRanking,
}

impl Cursor {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            offset: 0,
            ts: now.timestamp_millis(),
            seen: Vec::new(),
            ranking: WalkRanking::Full,
        }
    }

    /// Decode a client cursor, degrading to a fresh walk on any problem.
    pub fn decode(raw: Option<&str>, now: DateTime<Utc>, max_age: Duration) -> Self {
        let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw,
            None => return Self::fresh(now),
        };

        let payload = match decode_payload(raw) {
            Some(payload) => payload,
            None => {
                debug!("Ignoring undecodable cursor");
                return Self::fresh(now);
            }
        };

        let now_ms = now.timestamp_millis();
        let ts = payload.ts.unwrap_or(now_ms).min(now_ms);
        if payload.offset < 0 || now_ms - ts > max_age.as_millis() as i64 {
            debug!(offset = payload.offset, ts, "Cursor expired or invalid, restarting walk");
            return Self::fresh(now);
        }

        Self {
            offset: payload.offset as usize,
            ts,
            seen: payload.seen,
            ranking: payload.ranking,
        }
    }

    pub fn encode(&self) -> String {
        let payload = CursorPayload {
            offset: self.offset as i64,
            ts: Some(self.ts),
            seen: self.seen.clone(),
            ranking: self.ranking,
        };
        // Serializing a plain struct of numbers and strings cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        STANDARD.encode(json)
    }

    /// Cursor for the page after this one, in the same walk.
    pub fn next(&self, page_size: usize) -> Self {
        Self {
            offset: self.offset + page_size,
            ..self.clone()
        }
    }

    /// Same position, paging through `ranking` from here on.
    pub fn pinned(&self, ranking: WalkRanking) -> Self {
        Self {
            ranking,
            ..self.clone()
        }
    }

    pub fn clock(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.ts)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

fn decode_payload(raw: &str) -> Option<CursorPayload> {
    let bytes = STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE.decode(raw))
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub id: String,
    /// Epoch milliseconds when the item was served
    pub at: i64,
}

/// Bounded, ordered, de-duplicated seen list (oldest first)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenSet {
    entries: Vec<SeenEntry>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SeenEntry] {
        &self.entries
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Append ids not already present, keeping first-seen order.
    pub fn extend<I, S>(&mut self, ids: I, at: i64)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut present: HashSet<String> = self.entries.iter().map(|e| e.id.clone()).collect();
        for id in ids {
            let id = id.into();
            if id.is_empty() || !present.insert(id.clone()) {
                continue;
            }
            self.entries.push(SeenEntry { id, at });
        }
    }

    /// Merge client-carried ids; they count as seen before any walk.
    pub fn merge_inline(&mut self, ids: &[String]) {
        self.extend(ids.iter().cloned(), 0);
    }

    /// Keep only the most recent `cap` entries.
    pub fn truncate_oldest(&mut self, cap: usize) {
        if self.entries.len() > cap {
            let overflow = self.entries.len() - cap;
            self.entries.drain(..overflow);
        }
    }

    /// Ids to exclude for a walk that started at `walk_ts`
    pub fn exclusions(&self, walk_ts: i64) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|e| e.at < walk_ts)
            .map(|e| e.id.clone())
            .collect()
    }
}

/// Seen-set persistence in the shared cache
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn SharedCache>,
    cap: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn SharedCache>, cap: usize, ttl: Duration) -> Self {
        Self {
            cache,
            cap: cap.max(1),
            ttl,
        }
    }

    /// Load the session's seen set; cache failures read as empty.
    pub async fn load(&self, site: &str, session: &str) -> SeenSet {
        let key = keys::seen(site, session);
        match get_json::<SeenSet>(self.cache.as_ref(), &key).await {
            Ok(Some(seen)) => seen,
            Ok(None) => SeenSet::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Seen set unavailable, treating as empty");
                SeenSet::new()
            }
        }
    }

    /// Append served ids and write the capped set back. Failures are logged only.
    pub async fn append(
        &self,
        site: &str,
        session: &str,
        mut seen: SeenSet,
        ids: &[String],
        at: i64,
    ) -> SeenSet {
        seen.extend(ids.iter().cloned(), at);
        seen.truncate_oldest(self.cap);

        let key = keys::seen(site, session);
        if let Err(e) = set_json(self.cache.as_ref(), &key, &seen, self.ttl).await {
            warn!(key = %key, error = %e, "Failed to persist seen set");
        }
        seen
    }
}
