//! Patient loading for a selected condition.
//!
//! Two stages: the id list for the condition, then one phenotype fetch per
//! id, all concurrent. A failed detail fetch degrades that one patient to
//! a minimal identifier-only record instead of dropping it — the loaded
//! list always has exactly the length and order of the id-list reply.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::services::{Condition, Patient, PatientApi};

pub struct PatientLoader {
    api: Arc<dyn PatientApi>,
}

impl PatientLoader {
    pub fn new(api: Arc<dyn PatientApi>) -> Self {
        Self { api }
    }

    /// Load all patients for a condition. An empty or failed id-list fetch
    /// yields an empty list without raising; individual phenotype failures
    /// degrade per patient.
    pub async fn load_patients(&self, condition: Condition) -> Vec<Patient> {
        let ids = match self.api.patient_ids(condition).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(%condition, error = %e, "Patient id list fetch failed");
                return Vec::new();
            }
        };
        if ids.is_empty() {
            tracing::info!(%condition, "No patients for condition");
            return Vec::new();
        }

        tracing::debug!(%condition, count = ids.len(), "Fetching patient phenotypes");
        let fetches = ids.iter().map(|id| self.load_one(id));
        let patients = join_all(fetches).await;

        let degraded = patients.iter().filter(|p| !p.detail_loaded).count();
        if degraded > 0 {
            tracing::warn!(
                %condition,
                degraded,
                total = patients.len(),
                "Some phenotype fetches failed, minimal records substituted"
            );
        }
        patients
    }

    async fn load_one(&self, patient_id: &str) -> Patient {
        match self.api.phenotype(patient_id).await {
            Ok(patient) => patient,
            Err(e) => {
                tracing::debug!(patient_id, error = %e, "Phenotype fetch failed, degrading");
                Patient::minimal(patient_id)
            }
        }
    }
}
