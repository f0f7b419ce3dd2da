//! reqwest-backed implementation of the service traits.
//!
//! One shared client, one base URL per service, a flat timeout on every
//! request. Normalization happens immediately after deserialization so
//! callers only ever see canonical records.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::types::{
    Condition, InitializationStatus, LivenessReply, MatchReply, ParsedCriteria, Patient,
    PatientListReply, RawPhenotype, SearchReply,
};
use super::{CriteriaApi, HealthApi, MatchApi, PatientApi, ServiceError, TrialSearchApi};
use crate::config::{ServiceEndpoints, REQUEST_TIMEOUT_SECS};

/// HTTP client for all four backend services.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: ServiceEndpoints,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    term: &'a str,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    trial_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl HttpBackend {
    /// Build a backend over the given endpoints with the standard timeout.
    pub fn new(endpoints: ServiceEndpoints) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        Ok(Self { client, endpoints })
    }

    /// Backend over the environment-configured endpoints.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::new(ServiceEndpoints::from_env())
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
    ) -> Result<T, ServiceError> {
        let url = format!("{base}{path}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(e, base))?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let url = format!("{base}{path}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(e, base))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TrialSearchApi for HttpBackend {
    async fn search_trials(&self, condition: Condition) -> Result<SearchReply, ServiceError> {
        let body = SearchRequest {
            term: condition.as_str(),
        };
        self.post_json(&self.endpoints.search_base_url, "/search-trials", &body)
            .await
    }
}

#[async_trait]
impl CriteriaApi for HttpBackend {
    async fn parsed_criteria(&self, trial_id: &str) -> Result<ParsedCriteria, ServiceError> {
        self.get_json(
            &self.endpoints.criteria_base_url,
            &format!("/parsed-criteria/{trial_id}"),
        )
        .await
    }
}

#[async_trait]
impl PatientApi for HttpBackend {
    async fn patient_ids(&self, condition: Condition) -> Result<Vec<String>, ServiceError> {
        let reply: PatientListReply = self
            .get_json(
                &self.endpoints.patients_base_url,
                &format!("/patients?condition={condition}"),
            )
            .await?;
        Ok(reply.patients.into_iter().map(|p| p.id).collect())
    }

    async fn phenotype(&self, patient_id: &str) -> Result<Patient, ServiceError> {
        let raw: RawPhenotype = self
            .get_json(
                &self.endpoints.patients_base_url,
                &format!("/patients/{patient_id}/phenotype"),
            )
            .await?;
        Ok(raw.normalize())
    }
}

#[async_trait]
impl MatchApi for HttpBackend {
    async fn match_trial(
        &self,
        trial_id: &str,
        limit: Option<u32>,
    ) -> Result<MatchReply, ServiceError> {
        let body = MatchRequest { trial_id, limit };
        self.post_json(&self.endpoints.matching_base_url, "/match-trial", &body)
            .await
    }
}

#[async_trait]
impl HealthApi for HttpBackend {
    async fn liveness(&self) -> Result<LivenessReply, ServiceError> {
        self.get_json(&self.endpoints.patients_base_url, "/live").await
    }

    async fn initialization_status(&self) -> Result<InitializationStatus, ServiceError> {
        self.get_json(&self.endpoints.patients_base_url, "/initialization-status")
            .await
    }
}
