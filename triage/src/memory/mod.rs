//! User history: a TTL cache over the record store plus the summaries built
//! from it.

pub mod history_cache;
pub mod patterns;

pub use history_cache::{
    CacheEntry, HistoryCache, UserHistory, UserHistorySummary, DEFAULT_HISTORY_TTL,
};
pub use patterns::{history_context, UserPatterns};
