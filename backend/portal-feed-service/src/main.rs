use actix_web::{web, App, HttpServer};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal_feed::cache::{MemoryCache, RedisCache, SharedCache};
use portal_feed::clients::{
    ContentIndex, ContentStore, DisabledFeatureStore, FeatureStore, HttpContentIndex,
    PgContentStore, RedisFeatureStore,
};
use portal_feed::handlers::{
    get_feed, get_headlines, get_hot, get_topics, health, record_view, serve_metrics,
    FeedHandlerState,
};
use portal_feed::{Config, FeedAssembler, FeedDependencies};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Starting portal-feed-service v{}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("Environment: {}", config.app.env);

    // Shared cache: Redis when configured, in-process otherwise
    let cache: Arc<dyn SharedCache> = match config.redis.url.as_deref() {
        Some(url) => {
            let redis = RedisCache::connect(url, config.timeouts.cache())
                .await
                .context("Failed to connect shared cache")?;
            if let Err(e) = redis.ping().await {
                tracing::warn!("Shared cache ping failed, continuing: {}", e);
            }
            tracing::info!("Shared cache: redis");
            Arc::new(redis)
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process cache (single instance only)");
            Arc::new(MemoryCache::new())
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(&config.database.url)
        .context("Invalid DATABASE_URL")?;
    let store: Arc<dyn ContentStore> =
        Arc::new(PgContentStore::new(pool, config.timeouts.store()));

    let index: Arc<dyn ContentIndex> = Arc::new(HttpContentIndex::new(
        &config.index.url,
        &config.index.index_name,
        config.timeouts.index(),
        resilience::content_index_config().retry,
    ));

    let features: Arc<dyn FeatureStore> = match config.redis.features_url.as_deref() {
        Some(url) => match RedisFeatureStore::connect(url, config.timeouts.features()).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("Feature store unavailable, scoring without features: {}", e);
                Arc::new(DisabledFeatureStore)
            }
        },
        None => Arc::new(DisabledFeatureStore),
    };

    let assembler = FeedAssembler::new(
        FeedDependencies {
            index,
            store,
            features,
            cache,
        },
        &config,
    );
    let state = web::Data::new(FeedHandlerState {
        assembler,
        default_site: config.app.default_site.clone(),
    });

    tracing::info!("HTTP server listening on 0.0.0.0:{}", config.app.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(get_feed)
            .service(get_headlines)
            .service(get_hot)
            .service(get_topics)
            .service(record_view)
            .service(health)
            .service(serve_metrics)
    })
    .bind(format!("0.0.0.0:{}", config.app.port))?
    .run()
    .await?;

    Ok(())
}
