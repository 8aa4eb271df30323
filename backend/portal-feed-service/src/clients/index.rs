use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use resilience::{with_retry, with_timeout_result, RetryConfig, TimeoutError};

use super::{ContentIndex, IndexError, IndexQuery};
use crate::models::RawCandidate;

/// Elasticsearch-compatible content index over HTTP
#[derive(Clone)]
pub struct HttpContentIndex {
    client: reqwest::Client,
    search_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(rename = "_source", default)]
    source: Value,
}

impl HttpContentIndex {
    pub fn new(base_url: &str, index_name: &str, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            search_url: format!("{}/{}/_search", base_url.trim_end_matches('/'), index_name),
            timeout,
            retry,
        }
    }

    /// Build the bool query body
    pub fn query_body(query: &IndexQuery) -> Value {
        let mut filter = vec![
            json!({ "term": { "site": query.site } }),
            json!({ "range": { "published_at": { "gte": query.since.to_rfc3339() } } }),
        ];
        if !query.channels.is_empty() {
            filter.push(json!({ "terms": { "channel.slug": query.channels } }));
        }

        let mut bool_query = json!({ "filter": filter });
        if !query.exclude_ids.is_empty() {
            bool_query["must_not"] = json!([{ "ids": { "values": query.exclude_ids } }]);
        }

        json!({
            "size": query.size,
            "query": { "bool": bool_query },
            "sort": [{ "_score": "desc" }, { "published_at": "desc" }]
        })
    }

    async fn search_once(&self, body: &Value) -> Result<Vec<RawCandidate>, IndexError> {
        let response = self
            .client
            .post(&self.search_url)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Status(status.as_u16()));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Decode(e.to_string()))?;

        Ok(parse_hits(parsed))
    }
}

fn parse_hits(response: SearchResponse) -> Vec<RawCandidate> {
    response
        .hits
        .hits
        .into_iter()
        .filter_map(|hit| {
            let mut raw: RawCandidate = match serde_json::from_value(hit.source) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(id = ?hit.id, "Skipping malformed index hit: {}", e);
                    return None;
                }
            };
            if raw.id.is_none() {
                raw.id = hit.id.map(Value::String);
            }
            Some(raw)
        })
        .collect()
}

#[async_trait]
impl ContentIndex for HttpContentIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<RawCandidate>, IndexError> {
        let body = Self::query_body(query);

        let result = with_timeout_result(
            "content index search",
            self.timeout,
            with_retry(&self.retry, || self.search_once(&body)),
        )
        .await;

        match result {
            Ok(hits) => {
                debug!(site = %query.site, hits = hits.len(), "Content index search");
                Ok(hits)
            }
            Err(TimeoutError::Elapsed { after, .. }) => Err(IndexError::Timeout(after)),
            Err(TimeoutError::Failed(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn query(channels: Vec<&str>, exclude: Vec<&str>) -> IndexQuery {
        IndexQuery {
            site: "main".into(),
            channels: channels.into_iter().map(String::from).collect(),
            since: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            exclude_ids: exclude.into_iter().map(String::from).collect(),
            size: 200,
        }
    }

    #[test]
    fn test_empty_channels_emit_no_channel_clause() {
        let body = HttpContentIndex::query_body(&query(vec![], vec![]));
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 2);
        assert!(!body.to_string().contains("channel.slug"));
        assert!(body["query"]["bool"].get("must_not").is_none());
    }

    #[test]
    fn test_channels_and_exclusions_are_filtered() {
        let body = HttpContentIndex::query_body(&query(vec!["sports"], vec!["a", "b"]));
        assert_eq!(body["size"], 200);
        assert_eq!(
            body["query"]["bool"]["must_not"][0]["ids"]["values"],
            json!(["a", "b"])
        );
        assert!(body.to_string().contains("channel.slug"));
    }

    #[test]
    fn test_hits_fall_back_to_document_id() {
        let response: SearchResponse = serde_json::from_value(json!({
            "hits": { "hits": [
                { "_id": "doc-1", "_source": { "title": "A", "published_at": "2024-05-01T10:00:00Z" } },
                { "_id": "doc-2", "_source": { "id": 7, "title": "B", "published_at": "2024-05-01T10:00:00Z" } }
            ] }
        }))
        .unwrap();

        let hits = parse_hits(response);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, Some(json!("doc-1")));
        assert_eq!(hits[1].id, Some(json!(7)));
    }
}
