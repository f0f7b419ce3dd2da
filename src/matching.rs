//! Match orchestration for a selected trial.
//!
//! One matching call per trial selection. Selecting a new trial while a
//! call is pending supersedes it; the late reply for the old trial is
//! discarded via the selection generation held by the session state.
//! Sorting and quality classification are pure transformations over the
//! service-supplied results — nothing here mutates criterion content.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::services::{MatchApi, MatchResult, ServiceError};
use crate::session::SessionState;

// ═══════════════════════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════════════════════

/// Quality band for a match percentage. Boundaries are inclusive at the
/// lower end of each band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl MatchQuality {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            Self::Excellent
        } else if percentage >= 60.0 {
            Self::Good
        } else if percentage >= 40.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

impl std::fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Sorting
// ═══════════════════════════════════════════════════════════

/// Re-order key for displayed match results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Service rank, ascending. The default presentation.
    #[default]
    Rank,
    /// Match percentage, descending.
    Percentage,
    /// Patient identifier, lexicographic.
    PatientId,
}

/// Sort in place by the given key. Stable, so equal keys keep their
/// current relative order; applying the same key twice is a no-op.
pub fn sort_results(results: &mut [MatchResult], key: SortKey) {
    match key {
        SortKey::Rank => results.sort_by(|a, b| a.rank.cmp(&b.rank)),
        SortKey::Percentage => results.sort_by(|a, b| {
            b.percentage
                .partial_cmp(&a.percentage)
                .unwrap_or(Ordering::Equal)
        }),
        SortKey::PatientId => results.sort_by(|a, b| a.patient_id.cmp(&b.patient_id)),
    }
}

// ═══════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════

/// Failure to produce match results for a trial. Distinct from the valid
/// zero-results state, which is not an error.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Matching already pending for trial {trial_id}")]
    AlreadyPending { trial_id: String },
    #[error("Matching failed for trial {trial_id}: {source}")]
    Transport {
        trial_id: String,
        #[source]
        source: ServiceError,
    },
}

/// How a `match_trial` call resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Results committed and displayed.
    Ranked(usize),
    /// The service ran and returned zero results — a valid empty state.
    Empty,
    /// A newer selection superseded this call; its reply was discarded.
    Superseded,
}

/// Invokes the matching service once per trial selection and commits the
/// outcome through the session state's generation-gated transitions.
pub struct MatchOrchestrator {
    state: Arc<SessionState>,
    api: Arc<dyn MatchApi>,
    limit: Option<u32>,
}

impl MatchOrchestrator {
    pub fn new(state: Arc<SessionState>, api: Arc<dyn MatchApi>) -> Self {
        Self {
            state,
            api,
            limit: Some(crate::config::DEFAULT_MATCH_LIMIT),
        }
    }

    /// Override the ranked-result cap sent to the matching service.
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    /// Run matching for the selected trial. Re-invoking for the trial whose
    /// call is still pending is rejected; selecting a different trial
    /// supersedes the pending call.
    pub async fn match_trial(&self, trial_id: &str) -> Result<MatchOutcome, MatchError> {
        let Some(generation) = self.state.begin_selection(trial_id) else {
            return Err(MatchError::AlreadyPending {
                trial_id: trial_id.to_string(),
            });
        };

        tracing::info!(trial_id, generation, "Requesting trial match");
        match self.api.match_trial(trial_id, self.limit).await {
            Ok(reply) => {
                let count = reply.ranked_results.len();
                if !self.state.match_received(generation, reply) {
                    tracing::debug!(trial_id, "Discarding match reply for superseded selection");
                    return Ok(MatchOutcome::Superseded);
                }
                tracing::info!(trial_id, count, "Match results committed");
                if count == 0 {
                    Ok(MatchOutcome::Empty)
                } else {
                    Ok(MatchOutcome::Ranked(count))
                }
            }
            Err(e) => {
                if !self.state.match_failed(generation, &e.to_string()) {
                    tracing::debug!(trial_id, "Discarding match error for superseded selection");
                    return Ok(MatchOutcome::Superseded);
                }
                Err(MatchError::Transport {
                    trial_id: trial_id.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Re-sort the displayed results. Pure; never re-fetches.
    pub fn set_sort_key(&self, key: SortKey) {
        self.state.set_sort_key(key);
    }

    /// Open one patient's detail, closing any other; toggling the open
    /// patient closes it.
    pub fn toggle_expansion(&self, patient_id: &str) {
        self.state.toggle_expansion(patient_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::services::MatchReply;

    fn result(patient_id: &str, rank: u32, percentage: f64) -> MatchResult {
        MatchResult {
            patient_id: patient_id.to_string(),
            rank,
            score: percentage / 20.0,
            percentage,
            criteria: Vec::new(),
        }
    }

    // ── Classification ──────────────────────────────────────

    #[test]
    fn classification_band_boundaries_are_lower_inclusive() {
        assert_eq!(MatchQuality::from_percentage(100.0), MatchQuality::Excellent);
        assert_eq!(MatchQuality::from_percentage(80.0), MatchQuality::Excellent);
        assert_eq!(MatchQuality::from_percentage(79.9), MatchQuality::Good);
        assert_eq!(MatchQuality::from_percentage(60.0), MatchQuality::Good);
        assert_eq!(MatchQuality::from_percentage(59.9), MatchQuality::Fair);
        assert_eq!(MatchQuality::from_percentage(40.0), MatchQuality::Fair);
        assert_eq!(MatchQuality::from_percentage(39.9), MatchQuality::Poor);
        assert_eq!(MatchQuality::from_percentage(0.0), MatchQuality::Poor);
    }

    #[test]
    fn quality_display_names() {
        assert_eq!(MatchQuality::Excellent.to_string(), "excellent");
        assert_eq!(MatchQuality::Poor.to_string(), "poor");
    }

    // ── Sorting ─────────────────────────────────────────────

    #[test]
    fn sort_by_rank_ascending() {
        let mut results = vec![result("b", 2, 70.0), result("a", 1, 90.0), result("c", 3, 50.0)];
        sort_results(&mut results, SortKey::Rank);
        let ranks: Vec<u32> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn sort_by_percentage_descending() {
        let mut results = vec![result("a", 1, 50.0), result("b", 2, 90.0), result("c", 3, 70.0)];
        sort_results(&mut results, SortKey::Percentage);
        let pcts: Vec<f64> = results.iter().map(|r| r.percentage).collect();
        assert_eq!(pcts, vec![90.0, 70.0, 50.0]);
    }

    #[test]
    fn sort_by_patient_id_lexicographic() {
        let mut results = vec![result("p10", 1, 90.0), result("p02", 2, 70.0), result("p1", 3, 50.0)];
        sort_results(&mut results, SortKey::PatientId);
        let ids: Vec<&str> = results.iter().map(|r| r.patient_id.as_str()).collect();
        assert_eq!(ids, vec!["p02", "p1", "p10"]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let mut once = vec![result("b", 2, 70.0), result("a", 1, 70.0), result("c", 3, 50.0)];
        sort_results(&mut once, SortKey::Percentage);
        let mut twice = once.clone();
        sort_results(&mut twice, SortKey::Percentage);
        assert_eq!(once, twice);
    }

    #[test]
    fn equal_percentages_keep_relative_order() {
        // Stable sort: a and b tie, so their rank order survives
        let mut results = vec![result("a", 1, 70.0), result("b", 2, 70.0), result("c", 3, 90.0)];
        sort_results(&mut results, SortKey::Percentage);
        let ids: Vec<&str> = results.iter().map(|r| r.patient_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    // ── Orchestration ───────────────────────────────────────

    /// Replies after an optional delay per trial id.
    struct MockMatchApi {
        replies: Vec<(String, Duration, Result<MatchReply, u16>)>,
    }

    impl MockMatchApi {
        fn new() -> Self {
            Self { replies: Vec::new() }
        }

        fn reply(mut self, trial_id: &str, delay: Duration, results: Vec<MatchResult>) -> Self {
            self.replies.push((
                trial_id.to_string(),
                delay,
                Ok(MatchReply {
                    ranked_results: results,
                    exclusion_count: 0,
                }),
            ));
            self
        }

        fn failure(mut self, trial_id: &str, status: u16) -> Self {
            self.replies
                .push((trial_id.to_string(), Duration::ZERO, Err(status)));
            self
        }
    }

    #[async_trait]
    impl MatchApi for MockMatchApi {
        async fn match_trial(
            &self,
            trial_id: &str,
            _limit: Option<u32>,
        ) -> Result<MatchReply, ServiceError> {
            let (_, delay, reply) = self
                .replies
                .iter()
                .find(|(id, _, _)| id == trial_id)
                .expect("unexpected trial id in mock");
            tokio::time::sleep(*delay).await;
            match reply {
                Ok(r) => Ok(r.clone()),
                Err(status) => Err(ServiceError::Status {
                    status: *status,
                    body: "match failed".to_string(),
                }),
            }
        }
    }

    fn orchestrator(api: MockMatchApi) -> (Arc<SessionState>, MatchOrchestrator) {
        let state = Arc::new(SessionState::new());
        let orch = MatchOrchestrator::new(state.clone(), Arc::new(api));
        (state, orch)
    }

    #[tokio::test]
    async fn ranked_results_are_committed() {
        let api = MockMatchApi::new().reply(
            "NCT001",
            Duration::ZERO,
            vec![result("p1", 1, 90.0), result("p2", 2, 55.0)],
        );
        let (state, orch) = orchestrator(api);

        let outcome = orch.match_trial("NCT001").await.unwrap();
        assert_eq!(outcome, MatchOutcome::Ranked(2));

        let view = state.match_view().unwrap();
        assert_eq!(view.trial_id, "NCT001");
        assert_eq!(view.results.len(), 2);
        assert!(!state.is_match_pending());
    }

    #[tokio::test]
    async fn zero_results_is_empty_not_error() {
        let api = MockMatchApi::new().reply("NCT001", Duration::ZERO, Vec::new());
        let (state, orch) = orchestrator(api);

        let outcome = orch.match_trial("NCT001").await.unwrap();
        assert_eq!(outcome, MatchOutcome::Empty);
        assert!(state.match_view().unwrap().results.is_empty());
        assert!(state.match_error().is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_retryable_error_with_context() {
        let api = MockMatchApi::new().failure("NCT001", 502);
        let (state, orch) = orchestrator(api);

        let err = orch.match_trial("NCT001").await.unwrap_err();
        assert!(err.to_string().contains("NCT001"));
        assert!(state.match_view().is_none(), "No view on failure");
        assert!(state.match_error().is_some());
    }

    #[tokio::test]
    async fn late_reply_for_superseded_trial_is_discarded() {
        let api = MockMatchApi::new()
            .reply(
                "NCT001",
                Duration::from_millis(50),
                vec![result("old", 1, 10.0)],
            )
            .reply("NCT002", Duration::ZERO, vec![result("new", 1, 95.0)]);
        let (state, orch) = orchestrator(api);
        let orch = Arc::new(orch);

        let slow = tokio::spawn({
            let orch = orch.clone();
            async move { orch.match_trial("NCT001").await }
        });
        // Let the slow call claim its generation before superseding it
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fast = orch.match_trial("NCT002").await.unwrap();
        assert_eq!(fast, MatchOutcome::Ranked(1));

        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow, MatchOutcome::Superseded);

        let view = state.match_view().unwrap();
        assert_eq!(view.trial_id, "NCT002");
        assert_eq!(view.results[0].patient_id, "new");
    }

    #[tokio::test]
    async fn reinvoking_pending_trial_is_rejected() {
        let api = MockMatchApi::new().reply(
            "NCT001",
            Duration::from_millis(50),
            vec![result("p1", 1, 90.0)],
        );
        let (_state, orch) = orchestrator(api);
        let orch = Arc::new(orch);

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.match_trial("NCT001").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = orch.match_trial("NCT001").await;
        assert!(matches!(
            second,
            Err(MatchError::AlreadyPending { trial_id }) if trial_id == "NCT001"
        ));

        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn expansion_resets_on_new_selection() {
        let api = MockMatchApi::new()
            .reply("NCT001", Duration::ZERO, vec![result("p1", 1, 90.0)])
            .reply("NCT002", Duration::ZERO, vec![result("p2", 1, 80.0)]);
        let (state, orch) = orchestrator(api);

        orch.match_trial("NCT001").await.unwrap();
        orch.toggle_expansion("p1");
        assert_eq!(state.expanded_patient().as_deref(), Some("p1"));

        orch.match_trial("NCT002").await.unwrap();
        assert!(state.expanded_patient().is_none(), "Expansion must reset");
    }

    #[tokio::test]
    async fn sort_key_reorders_displayed_results() {
        let api = MockMatchApi::new().reply(
            "NCT001",
            Duration::ZERO,
            vec![result("b", 1, 50.0), result("a", 2, 90.0)],
        );
        let (state, orch) = orchestrator(api);
        orch.match_trial("NCT001").await.unwrap();

        orch.set_sort_key(SortKey::Percentage);
        let view = state.match_view().unwrap();
        assert_eq!(view.results[0].patient_id, "a");

        orch.set_sort_key(SortKey::Rank);
        let view = state.match_view().unwrap();
        assert_eq!(view.results[0].patient_id, "b");
    }
}
