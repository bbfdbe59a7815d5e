//! Time-bounded cache of user ticket history.
//!
//! History is personalization context only. A failed fetch degrades to an
//! empty, not-found history instead of an error, and stale-but-unexpired
//! entries are served as-is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::handlers::PersistenceClient;

/// Entries older than this are treated as absent.
pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(300);

/// Digest of one past ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHistorySummary {
    pub ticket_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A cached value and when it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    /// Valid iff `now - fetched_at < ttl`.
    pub fn is_valid(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Result of a history lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHistory {
    pub user_id: String,
    pub tickets: Vec<UserHistorySummary>,
    /// `false` when the store had nothing or could not be reached.
    pub found: bool,
    pub from_cache: bool,
    /// Why the lookup degraded to not-found, for logs.
    pub error: Option<String>,
}

impl UserHistory {
    fn not_found(user_id: &str, error: String) -> Self {
        Self {
            user_id: user_id.to_string(),
            tickets: Vec::new(),
            found: false,
            from_cache: false,
            error: Some(error),
        }
    }
}

type CacheKey = (String, usize);

/// Fetches in flight for one user and the invalidations seen meanwhile.
#[derive(Debug, Default)]
struct PendingFetches {
    in_flight: usize,
    generation: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry<Vec<UserHistorySummary>>>,
    // Only users with a fetch in flight have an entry here.
    pending: HashMap<String, PendingFetches>,
}

/// History cache keyed by `(user_id, limit)`.
///
/// Entries expire after the TTL and are otherwise only dropped by
/// [`HistoryCache::invalidate`] or [`HistoryCache::purge_expired`]. A fetch
/// that was already running when its user was invalidated returns its result
/// to the caller but does not cache it.
pub struct HistoryCache {
    store: Arc<dyn PersistenceClient>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

/// Registration of one in-flight fetch. Dropping it (including when the
/// fetch future is dropped on a deadline) unregisters the fetch.
struct FetchLease<'a> {
    cache: &'a HistoryCache,
    user_id: &'a str,
    generation: u64,
}

impl<'a> FetchLease<'a> {
    fn begin(cache: &'a HistoryCache, user_id: &'a str) -> Self {
        let mut state = cache.lock();
        let pending = state.pending.entry(user_id.to_string()).or_default();
        pending.in_flight += 1;
        let generation = pending.generation;
        Self {
            cache,
            user_id,
            generation,
        }
    }

    /// Cache `tickets` unless the user was invalidated since `begin`.
    fn complete(&self, key: CacheKey, tickets: Vec<UserHistorySummary>) -> bool {
        let mut state = self.cache.lock();
        let current = state.pending.get(self.user_id).map(|p| p.generation);
        if current != Some(self.generation) {
            return false;
        }
        state.entries.insert(key, CacheEntry::new(tickets));
        true
    }
}

impl Drop for FetchLease<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.lock();
        let idle = match state.pending.get_mut(self.user_id) {
            Some(pending) => {
                pending.in_flight = pending.in_flight.saturating_sub(1);
                pending.in_flight == 0
            }
            None => false,
        };
        if idle {
            state.pending.remove(self.user_id);
        }
    }
}

impl HistoryCache {
    pub fn new(store: Arc<dyn PersistenceClient>) -> Self {
        Self::with_ttl(store, DEFAULT_HISTORY_TTL)
    }

    pub fn with_ttl(store: Arc<dyn PersistenceClient>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // The map only holds advisory data, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, key: &CacheKey) -> Option<Vec<UserHistorySummary>> {
        let state = self.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_valid(self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// History for `user_id`, at most `limit` tickets.
    ///
    /// Served from cache when a valid entry exists; otherwise fetched from the
    /// store and cached on success.
    pub async fn get(&self, user_id: &str, limit: usize) -> UserHistory {
        let key = (user_id.to_string(), limit);

        if let Some(tickets) = self.cached(&key) {
            debug!(user_id, limit, "history cache hit");
            return UserHistory {
                user_id: user_id.to_string(),
                found: true,
                tickets,
                from_cache: true,
                error: None,
            };
        }

        let lease = FetchLease::begin(self, user_id);
        match self.store.fetch_ticket_history(user_id, limit).await {
            Ok(tickets) => {
                let cached = lease.complete(key, tickets.clone());
                debug!(user_id, limit, count = tickets.len(), cached, "history fetched");
                UserHistory {
                    user_id: user_id.to_string(),
                    found: true,
                    tickets,
                    from_cache: false,
                    error: None,
                }
            }
            Err(e) => {
                warn!(user_id, error = %e, "history unavailable, proceeding without it");
                UserHistory::not_found(user_id, e.to_string())
            }
        }
    }

    /// Drop every entry for `user_id`, whatever the limit.
    ///
    /// Fetches for `user_id` still in flight will not cache their result, so
    /// the next read goes to the store.
    pub fn invalidate(&self, user_id: &str) {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|(uid, _), _| uid != user_id);
        let removed = before - state.entries.len();
        if let Some(pending) = state.pending.get_mut(user_id) {
            pending.generation += 1;
        }
        debug!(user_id, removed, "history invalidated");
    }

    /// Remove expired entries. Reads never serve them either way.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_valid(self.ttl));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
