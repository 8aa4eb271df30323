pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use error::{AppError, Result};

pub use services::{
    CandidateSource, CacheStrategyEngine, DiversitySelector, FeatureEnricher, FeedAssembler,
    FeedDependencies, Profiler, SessionStore,
};
