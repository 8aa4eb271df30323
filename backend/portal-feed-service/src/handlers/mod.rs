pub mod feed;

pub use feed::{
    get_feed, get_headlines, get_hot, get_topics, health, record_view, serve_metrics,
    FeedHandlerState,
};
