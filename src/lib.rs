//! Clinical trial matching workflow core.
//!
//! Drives a four-service backend (trial search, criteria parsing, patient
//! store, matching engine) through one session-scoped workflow: search for
//! trials by condition, prefetch eligibility criteria and patient
//! phenotypes, run patient matching for a selected trial, and keep an eye
//! on backend health throughout. All cross-service plumbing, caching, and
//! staleness handling lives here; callers interact through [`Workflow`]
//! and read the shared [`session::SessionState`].

pub mod config;
pub mod criteria;
pub mod health;
pub mod matching;
pub mod patients;
pub mod search;
pub mod services;
pub mod session;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::criteria::{CriteriaCache, CriteriaFetcher};
use crate::health::{HealthMonitor, HealthMonitorHandle};
use crate::matching::MatchOrchestrator;
use crate::patients::PatientLoader;
use crate::search::SearchController;
use crate::services::http::HttpBackend;
use crate::services::{CriteriaApi, HealthApi, MatchApi, PatientApi, TrialSearchApi};
use crate::session::SessionState;

/// Initialize tracing. `RUST_LOG` overrides the built-in filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}

/// Everything one user session needs, wired together. Service clients are
/// trait objects so tests swap in mocks per component.
pub struct Workflow {
    state: Arc<SessionState>,
    cache: Arc<CriteriaCache>,
    search: SearchController,
    matching: MatchOrchestrator,
    health: HealthMonitor,
}

impl Workflow {
    /// Wire a workflow against real HTTP backends resolved from the
    /// environment.
    pub fn from_env() -> Result<Self, services::ServiceError> {
        let backend = Arc::new(HttpBackend::from_env()?);
        Ok(Self::with_apis(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend,
        ))
    }

    pub fn with_apis(
        search_api: Arc<dyn TrialSearchApi>,
        criteria_api: Arc<dyn CriteriaApi>,
        patient_api: Arc<dyn PatientApi>,
        match_api: Arc<dyn MatchApi>,
        health_api: Arc<dyn HealthApi>,
    ) -> Self {
        let state = Arc::new(SessionState::new());
        let cache = Arc::new(CriteriaCache::new());

        let search = SearchController::new(
            state.clone(),
            search_api,
            CriteriaFetcher::new(cache.clone(), criteria_api),
            PatientLoader::new(patient_api),
        );
        let matching = MatchOrchestrator::new(state.clone(), match_api);
        let health = HealthMonitor::new(health_api);

        Self {
            state,
            cache,
            search,
            matching,
            health,
        }
    }

    /// Shared session state, for rendering.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Session-global criteria cache, for rendering per-trial criteria.
    pub fn criteria_cache(&self) -> &Arc<CriteriaCache> {
        &self.cache
    }

    pub fn search(&self) -> &SearchController {
        &self.search
    }

    pub fn matching(&self) -> &MatchOrchestrator {
        &self.matching
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Start the background health polls. Keep the handle alive for as
    /// long as polling should continue.
    pub fn start_health_monitor(&self) -> HealthMonitorHandle {
        self.health.start()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::matching::MatchOutcome;
    use crate::search::SearchOutcome;
    use crate::services::types::{
        InitializationStatus, LivenessReply, MatchReply, MatchResult, ParsedCriteria, RawTrial,
        SearchReply,
    };
    use crate::services::{Condition, Patient, ServiceError};

    /// One mock standing in for all four backends.
    struct FakeBackend {
        criteria_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                criteria_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TrialSearchApi for FakeBackend {
        async fn search_trials(&self, _condition: Condition) -> Result<SearchReply, ServiceError> {
            let raw: RawTrial =
                serde_json::from_str(r#"{"nct_id": "NCT100", "title": "Metformin study"}"#)
                    .map_err(|e| ServiceError::Decode(e.to_string()))?;
            Ok(SearchReply {
                trials: vec![raw],
                message: None,
            })
        }
    }

    #[async_trait]
    impl CriteriaApi for FakeBackend {
        async fn parsed_criteria(&self, _trial_id: &str) -> Result<ParsedCriteria, ServiceError> {
            self.criteria_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ParsedCriteria::default())
        }
    }

    #[async_trait]
    impl PatientApi for FakeBackend {
        async fn patient_ids(&self, _condition: Condition) -> Result<Vec<String>, ServiceError> {
            Ok(vec!["p1".into()])
        }

        async fn phenotype(&self, patient_id: &str) -> Result<Patient, ServiceError> {
            Ok(Patient::minimal(patient_id))
        }
    }

    #[async_trait]
    impl MatchApi for FakeBackend {
        async fn match_trial(
            &self,
            _trial_id: &str,
            _limit: Option<u32>,
        ) -> Result<MatchReply, ServiceError> {
            Ok(MatchReply {
                ranked_results: vec![MatchResult {
                    patient_id: "p1".into(),
                    rank: 1,
                    score: 0.9,
                    percentage: 90.0,
                    criteria: Vec::new(),
                }],
                exclusion_count: 0,
            })
        }
    }

    #[async_trait]
    impl HealthApi for FakeBackend {
        async fn liveness(&self) -> Result<LivenessReply, ServiceError> {
            Ok(LivenessReply {
                status: "alive".into(),
            })
        }

        async fn initialization_status(&self) -> Result<InitializationStatus, ServiceError> {
            Ok(InitializationStatus {
                is_initialized: true,
                ..Default::default()
            })
        }
    }

    fn workflow(backend: Arc<FakeBackend>) -> Workflow {
        Workflow::with_apis(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend,
        )
    }

    #[tokio::test]
    async fn end_to_end_search_then_match() {
        let backend = FakeBackend::new();
        let wf = workflow(backend.clone());

        let outcome = wf.search().search(Condition::Diabetes).await.unwrap();
        assert_eq!(outcome, SearchOutcome::Results(1));
        assert_eq!(backend.criteria_calls.load(Ordering::SeqCst), 1);
        assert!(wf.criteria_cache().criteria("NCT100").is_some());
        assert_eq!(wf.state().patients().len(), 1);

        let outcome = wf.matching().match_trial("NCT100").await.unwrap();
        assert_eq!(outcome, MatchOutcome::Ranked(1));
        let view = wf.state().match_view().unwrap();
        assert_eq!(view.trial_id, "NCT100");
        assert_eq!(view.results[0].patient_id, "p1");
    }

    #[tokio::test]
    async fn health_refresh_through_facade() {
        let wf = workflow(FakeBackend::new());
        wf.health().refresh().await;
        assert_eq!(wf.health().liveness(), health::ServiceHealth::Healthy);
        assert!(wf.health().initialization().unwrap().is_initialized);
    }
}
