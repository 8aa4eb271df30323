pub mod assembler;
pub mod cache_strategy;
pub mod candidates;
pub mod clustering;
pub mod diversity;
pub mod enrichment;
pub mod profiler;
pub mod scoring;
pub mod session;

pub use assembler::{FeedAssembler, FeedDependencies};
pub use cache_strategy::CacheStrategyEngine;
pub use candidates::CandidateSource;
pub use diversity::DiversitySelector;
pub use enrichment::FeatureEnricher;
pub use profiler::Profiler;
pub use session::SessionStore;
