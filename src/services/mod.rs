//! Request/response contracts for the four backend services.
//!
//! The workflow core treats every service purely through these traits:
//! trial search, criteria parsing, patient phenotypes, match ranking, and
//! the health endpoints of the patient store. The traits exist so the
//! orchestration layers can be exercised against mock services in tests;
//! [`http::HttpBackend`] is the production implementation.

pub mod http;
pub mod types;

use async_trait::async_trait;

pub use types::{
    Condition, CriterionKind, CriterionMatch, CriterionRule, InitializationProgress,
    InitializationStatus, LivenessReply, MatchReply, MatchResult, ParsedCriteria, Patient,
    SearchReply, Trial, UnsupportedCondition,
};

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

/// Transport-level failure talking to a backend service. All variants are
/// retryable from the caller's point of view.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Cannot reach service at {0}")]
    Connect(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Map a reqwest error onto the taxonomy, keeping the base URL for
    /// connect failures so the user-visible message names the service.
    pub fn from_reqwest(err: reqwest::Error, base_url: &str) -> Self {
        if err.is_connect() {
            Self::Connect(base_url.to_string())
        } else if err.is_timeout() {
            Self::Timeout(crate::config::REQUEST_TIMEOUT_SECS)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connect(base_url.to_string())
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Trial search service: one POST per user-selected condition.
#[async_trait]
pub trait TrialSearchApi: Send + Sync {
    async fn search_trials(&self, condition: Condition) -> Result<SearchReply, ServiceError>;
}

/// Criteria parsing service: parsed eligibility rules per trial.
#[async_trait]
pub trait CriteriaApi: Send + Sync {
    async fn parsed_criteria(&self, trial_id: &str) -> Result<ParsedCriteria, ServiceError>;
}

/// Patient phenotype store: id list per condition, then detail per patient.
#[async_trait]
pub trait PatientApi: Send + Sync {
    async fn patient_ids(&self, condition: Condition) -> Result<Vec<String>, ServiceError>;
    async fn phenotype(&self, patient_id: &str) -> Result<Patient, ServiceError>;
}

/// Matching service: one ranked result set per trial.
#[async_trait]
pub trait MatchApi: Send + Sync {
    async fn match_trial(
        &self,
        trial_id: &str,
        limit: Option<u32>,
    ) -> Result<MatchReply, ServiceError>;
}

/// Health endpoints of the patient store: liveness plus data-loading
/// progress during startup.
#[async_trait]
pub trait HealthApi: Send + Sync {
    async fn liveness(&self) -> Result<LivenessReply, ServiceError>;
    async fn initialization_status(&self) -> Result<InitializationStatus, ServiceError>;
}
