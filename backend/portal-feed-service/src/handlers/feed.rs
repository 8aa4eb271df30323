/// Feed API Handlers
///
/// Thin HTTP shell over the feed assembler: parses query parameters leniently,
/// derives the client context from headers and maps total failures to 503.
use actix_web::{get, http::header, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{ClientContext, DiversityLevel, FeedKind, FeedRequest, FeedResponse};
use crate::services::FeedAssembler;
use resilience::CircuitState;

pub const SESSION_COOKIE: &str = "portal_session";
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Shared state for the feed handlers
pub struct FeedHandlerState {
    pub assembler: FeedAssembler,
    pub default_site: String,
}

/// Query parameters shared by every feed endpoint.
///
/// Everything arrives as text so malformed numbers fall back to defaults
/// instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub site: Option<String>,
    /// Comma separated channel slugs
    pub channels: Option<String>,
    pub hours: Option<String>,
    pub size: Option<String>,
    pub diversity: Option<String>,
    pub cursor: Option<String>,
    pub debug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ViewRequest {
    pub site: Option<String>,
    pub channel: String,
}

fn parse_lenient<T: FromStr>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|value| value.trim().parse().ok())
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

pub fn parse_channels(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Build a feed request; the assembler normalizes bounds.
pub fn build_request(
    kind: FeedKind,
    query: &FeedQuery,
    client: ClientContext,
    default_site: &str,
) -> FeedRequest {
    let site = query
        .site
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_site);

    let mut request = FeedRequest::new(kind, site);
    request.channels = parse_channels(query.channels.as_deref());
    request.hours = parse_lenient(query.hours.as_deref());
    if let Some(size) = parse_lenient::<usize>(query.size.as_deref()) {
        request.size = size;
    }
    request.diversity = DiversityLevel::parse(query.diversity.as_deref());
    request.cursor = query.cursor.clone().filter(|c| !c.trim().is_empty());
    request.debug = parse_flag(query.debug.as_deref());
    request.client = client;
    request
}

fn header_value(req: &HttpRequest, name: impl header::AsHeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client context from request headers.
///
/// The first `X-Forwarded-For` hop wins over the peer address.
pub fn client_context(req: &HttpRequest) -> ClientContext {
    let ip = header_value(req, "X-Forwarded-For")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()));

    ClientContext {
        user_agent: header_value(req, header::USER_AGENT),
        ip,
        accept_language: header_value(req, header::ACCEPT_LANGUAGE),
        session_cookie: req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()),
        user_id: header_value(req, USER_ID_HEADER),
    }
}

fn respond(response: FeedResponse) -> HttpResponse {
    if response.is_total_failure() {
        return HttpResponse::ServiceUnavailable().json(response);
    }
    HttpResponse::Ok()
        .insert_header((
            header::CACHE_CONTROL,
            format!(
                "public, max-age={}, s-maxage={}",
                response.cache_strategy.gateway_ttl, response.cache_strategy.cdn_ttl
            ),
        ))
        .json(response)
}

async fn serve(
    kind: FeedKind,
    req: HttpRequest,
    query: web::Query<FeedQuery>,
    state: web::Data<FeedHandlerState>,
) -> HttpResponse {
    let request = build_request(kind, &query, client_context(&req), &state.default_site);
    debug!(
        kind = kind.as_str(),
        site = %request.site,
        size = request.size,
        has_cursor = request.cursor.is_some(),
        "Feed request"
    );
    let span = info_span!("feed_request", request_id = %Uuid::new_v4(), kind = kind.as_str());
    let response = state.assembler.assemble(request).instrument(span).await;
    if response.is_total_failure() {
        warn!(kind = kind.as_str(), "Feed request failed on every data path");
    }
    // Personalized pages must not be shared by intermediaries.
    let mut http = respond(response);
    if kind == FeedKind::Feed && http.status().is_success() {
        http.headers_mut().insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("private, no-store"),
        );
    }
    http
}

/// GET /api/v1/feed
#[get("/api/v1/feed")]
pub async fn get_feed(
    req: HttpRequest,
    query: web::Query<FeedQuery>,
    state: web::Data<FeedHandlerState>,
) -> HttpResponse {
    serve(FeedKind::Feed, req, query, state).await
}

/// GET /api/v1/headlines
#[get("/api/v1/headlines")]
pub async fn get_headlines(
    req: HttpRequest,
    query: web::Query<FeedQuery>,
    state: web::Data<FeedHandlerState>,
) -> HttpResponse {
    serve(FeedKind::Headlines, req, query, state).await
}

/// GET /api/v1/hot
#[get("/api/v1/hot")]
pub async fn get_hot(
    req: HttpRequest,
    query: web::Query<FeedQuery>,
    state: web::Data<FeedHandlerState>,
) -> HttpResponse {
    serve(FeedKind::Hot, req, query, state).await
}

/// GET /api/v1/topics
#[get("/api/v1/topics")]
pub async fn get_topics(
    req: HttpRequest,
    query: web::Query<FeedQuery>,
    state: web::Data<FeedHandlerState>,
) -> HttpResponse {
    serve(FeedKind::Topics, req, query, state).await
}

/// POST /api/v1/feed/views
///
/// Records a channel view for the anonymous profile of the calling device
#[post("/api/v1/feed/views")]
pub async fn record_view(
    req: HttpRequest,
    body: web::Json<ViewRequest>,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    if body.channel.trim().is_empty() {
        return Err(AppError::BadRequest("channel is required".to_string()));
    }
    let site = body
        .site
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&state.default_site)
        .to_lowercase();

    let identity = state
        .assembler
        .profiler()
        .record_view(&client_context(&req), &site, &body.channel)
        .await?;

    Ok(HttpResponse::Accepted().json(json!({
        "session_id": identity.session_id,
    })))
}

/// GET /health
#[get("/health")]
pub async fn health(state: web::Data<FeedHandlerState>) -> HttpResponse {
    let mut dependencies = serde_json::Map::new();
    for (name, circuit) in state.assembler.dependency_states().await {
        let value = match circuit {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
        };
        dependencies.insert(name, json!(value));
    }
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "breakers": dependencies,
    }))
}

/// GET /metrics
#[get("/metrics")]
pub async fn serve_metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::gather())
}
