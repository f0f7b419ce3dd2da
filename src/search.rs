//! Top-level search workflow.
//!
//! `search(condition)` is the entry point of the whole page flow: it calls
//! the trial search service, and on a non-empty result fans out to the
//! criteria fetcher (per returned trial) and the patient loader (for the
//! condition) concurrently. The two downstream fetches are independent of
//! each other's completion, and every commit is tagged with the search
//! generation so a newer search silently discards anything the old one
//! still delivers.

use std::sync::Arc;

use crate::criteria::CriteriaFetcher;
use crate::patients::PatientLoader;
use crate::services::{Condition, ServiceError, TrialSearchApi};
use crate::session::SessionState;

/// Search failure visible to the user. Retryable; names the condition so
/// the retry affordance can re-run exactly the failed search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Trial search for '{condition}' failed: {source}")]
    Transport {
        condition: Condition,
        #[source]
        source: ServiceError,
    },
}

/// How a `search` call resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Trials committed; downstream criteria/patient fetches completed
    /// (individually degraded entries included).
    Results(usize),
    /// The service ran and found nothing — informational, not an error.
    NoResults(String),
    /// A newer search superseded this one; its results were discarded.
    Superseded,
}

pub struct SearchController {
    state: Arc<SessionState>,
    search_api: Arc<dyn TrialSearchApi>,
    criteria: CriteriaFetcher,
    patients: PatientLoader,
}

impl SearchController {
    pub fn new(
        state: Arc<SessionState>,
        search_api: Arc<dyn TrialSearchApi>,
        criteria: CriteriaFetcher,
        patients: PatientLoader,
    ) -> Self {
        Self {
            state,
            search_api,
            criteria,
            patients,
        }
    }

    /// Run the full search flow for a condition. Exactly one search is
    /// current at a time: invoking this again supersedes the previous
    /// call's outstanding commits.
    pub async fn search(&self, condition: Condition) -> Result<SearchOutcome, SearchError> {
        let generation = self.state.begin_search(condition);

        let reply = match self.search_api.search_trials(condition).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(%condition, error = %e, "Trial search failed");
                if !self
                    .state
                    .search_failed(generation, format!("{condition}: {e}"))
                {
                    return Ok(SearchOutcome::Superseded);
                }
                return Err(SearchError::Transport {
                    condition,
                    source: e,
                });
            }
        };

        let message = reply.message.clone();
        let trials = reply.into_trials();
        if trials.is_empty() {
            let message =
                message.unwrap_or_else(|| format!("No clinical trials found for '{condition}'."));
            if !self.state.search_empty(generation, message.clone()) {
                return Ok(SearchOutcome::Superseded);
            }
            return Ok(SearchOutcome::NoResults(message));
        }

        let trial_ids: Vec<String> = trials.iter().map(|t| t.id.clone()).collect();
        let count = trials.len();
        if !self.state.search_succeeded(generation, trials) {
            return Ok(SearchOutcome::Superseded);
        }

        // Criteria and patients load concurrently and independently; the
        // criteria cache is keyed by trial id and session-global, so its
        // writes are safe even if this search gets superseded mid-flight.
        let (_, patients) = tokio::join!(
            self.criteria.ensure_criteria(&trial_ids),
            self.patients.load_patients(condition),
        );

        if !self.state.patients_loaded(generation, patients) {
            return Ok(SearchOutcome::Superseded);
        }

        tracing::info!(%condition, trials = count, "Search flow complete");
        Ok(SearchOutcome::Results(count))
    }

    /// User-triggered retry of the criteria fetch for one trial.
    pub async fn refresh_criteria(&self, trial_id: &str) {
        self.criteria.refresh(trial_id).await;
    }
}
