//! Per-trial criteria cache and the fetcher that fills it.
//!
//! The cache is a session-scoped monotonic map: once a trial id holds
//! either parsed criteria or the `Unavailable` sentinel it is never reset,
//! except by an explicit user-triggered [`CriteriaFetcher::refresh`]. The
//! sentinel keeps fetch-failed distinct from never-requested so a failed
//! trial is not retried on every render, while a manual retry stays
//! possible.
//!
//! Concurrency: a key is claimed (`InFlight`) before its network call
//! starts, so two near-simultaneous triggers for the same trial issue at
//! most one request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;

use crate::services::{CriteriaApi, ParsedCriteria};

// ═══════════════════════════════════════════════════════════
// Cache store
// ═══════════════════════════════════════════════════════════

/// State of one trial id in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// A fetch for this id has started and not yet resolved.
    InFlight,
    /// Criteria fetched successfully.
    Ready(ParsedCriteria),
    /// Fetch attempted and failed; distinct from "never requested".
    Unavailable,
}

/// Keyed memo of per-trial eligibility criteria. Never evicts within a
/// session.
pub struct CriteriaCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CriteriaCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a key for fetching. Returns `false` when the key already
    /// holds a value, a sentinel, or another claim — the caller must not
    /// issue a request in that case.
    pub fn claim(&self, trial_id: &str) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        if entries.contains_key(trial_id) {
            return false;
        }
        entries.insert(trial_id.to_string(), CacheEntry::InFlight);
        true
    }

    /// Reclaim a key for an explicit user-triggered refresh, regardless of
    /// its current state. The only path that may overwrite a populated key.
    pub fn reclaim_for_refresh(&self, trial_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(trial_id.to_string(), CacheEntry::InFlight);
        }
    }

    /// Store fetched criteria. Populated keys are left untouched unless
    /// the key holds a claim (normal resolution) — the map is monotonic.
    pub fn store(&self, trial_id: &str, criteria: ParsedCriteria) {
        self.resolve(trial_id, CacheEntry::Ready(criteria));
    }

    /// Store the failure sentinel for a claimed key.
    pub fn store_unavailable(&self, trial_id: &str) {
        self.resolve(trial_id, CacheEntry::Unavailable);
    }

    fn resolve(&self, trial_id: &str, entry: CacheEntry) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        match entries.get(trial_id) {
            Some(CacheEntry::InFlight) | None => {
                entries.insert(trial_id.to_string(), entry);
            }
            // Already populated: a stale resolution must not overwrite.
            Some(_) => {}
        }
    }

    /// Current entry for a trial id, `None` when never requested.
    pub fn get(&self, trial_id: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(trial_id).cloned())
    }

    /// Parsed criteria for a trial, when present and successful.
    pub fn criteria(&self, trial_id: &str) -> Option<ParsedCriteria> {
        match self.get(trial_id) {
            Some(CacheEntry::Ready(criteria)) => Some(criteria),
            _ => None,
        }
    }

    /// Whether the fetch for this trial failed.
    pub fn is_unavailable(&self, trial_id: &str) -> bool {
        matches!(self.get(trial_id), Some(CacheEntry::Unavailable))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CriteriaCache {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════

/// Fills the cache from the criteria parsing service, one request per
/// not-yet-cached trial, all failures isolated per item.
pub struct CriteriaFetcher {
    cache: Arc<CriteriaCache>,
    api: Arc<dyn CriteriaApi>,
}

impl CriteriaFetcher {
    pub fn new(cache: Arc<CriteriaCache>, api: Arc<dyn CriteriaApi>) -> Self {
        Self { cache, api }
    }

    pub fn cache(&self) -> &Arc<CriteriaCache> {
        &self.cache
    }

    /// Fetch criteria for every trial id not already present in the cache.
    /// Fetches run concurrently and independently; one trial's failure
    /// never aborts the others. Observable entirely through the cache.
    pub async fn ensure_criteria(&self, trial_ids: &[String]) {
        let pending: Vec<&String> = trial_ids
            .iter()
            .filter(|id| self.cache.claim(id))
            .collect();
        if pending.is_empty() {
            return;
        }
        tracing::debug!(count = pending.len(), "Fetching criteria for uncached trials");
        join_all(pending.into_iter().map(|id| self.fetch_one(id))).await;
    }

    /// User-triggered re-fetch of a single trial, overwriting whatever the
    /// cache holds for it.
    pub async fn refresh(&self, trial_id: &str) {
        self.cache.reclaim_for_refresh(trial_id);
        self.fetch_one(trial_id).await;
    }

    async fn fetch_one(&self, trial_id: &str) {
        match self.api.parsed_criteria(trial_id).await {
            Ok(criteria) => {
                tracing::debug!(
                    trial_id,
                    rules = criteria.total_rules_extracted,
                    "Criteria cached"
                );
                self.cache.store(trial_id, criteria);
            }
            Err(e) => {
                tracing::warn!(trial_id, error = %e, "Criteria fetch failed, storing sentinel");
                self.cache.store_unavailable(trial_id);
            }
        }
    }
}
