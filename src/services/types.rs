//! Canonical records and upstream wire shapes.
//!
//! Upstream services disagree on field names (`nct_id` vs `nctId` vs
//! `trial_id`, `match_percentage` vs `percentage`, ...). All of that is
//! absorbed here, once, at the service boundary: raw shapes deserialize
//! with serde aliases and are converted into the canonical records below.
//! Nothing past this module ever inspects a raw upstream shape.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Condition
// ═══════════════════════════════════════════════════════════

/// Search conditions the trial search service has data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Diabetes,
    Dementia,
    Cancer,
}

impl Condition {
    /// All supported conditions, in display order.
    pub const ALL: &'static [Condition] =
        &[Condition::Diabetes, Condition::Dementia, Condition::Cancer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diabetes => "diabetes",
            Self::Dementia => "dementia",
            Self::Cancer => "cancer",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Condition {
    type Err = UnsupportedCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diabetes" => Ok(Self::Diabetes),
            "dementia" => Ok(Self::Dementia),
            "cancer" => Ok(Self::Cancer),
            other => Err(UnsupportedCondition(other.to_string())),
        }
    }
}

/// A search term outside the supported condition set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unsupported condition '{0}' (expected one of: diabetes, dementia, cancer)")]
pub struct UnsupportedCondition(pub String);

// ═══════════════════════════════════════════════════════════
// Trial
// ═══════════════════════════════════════════════════════════

/// One clinical-study record from the search service. Immutable once
/// received; `id` is unique within a result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    pub id: String,
    pub title: String,
    pub location: String,
    pub phase: String,
    pub summary: String,
}

/// Trial as the search service sends it, before normalization.
#[derive(Debug, Deserialize)]
pub struct RawTrial {
    #[serde(default, alias = "nctId", alias = "trial_id", alias = "id")]
    pub nct_id: Option<String>,
    #[serde(default, alias = "briefTitle")]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Either a string or a list of phase names.
    #[serde(default)]
    pub phase: Option<serde_json::Value>,
    #[serde(default, alias = "brief_summary", alias = "study_population")]
    pub summary: Option<String>,
}

impl RawTrial {
    /// Normalize into a canonical [`Trial`]. Returns `None` when no usable
    /// identifier is present — such records are dropped at the boundary.
    pub fn normalize(self) -> Option<Trial> {
        let id = self.nct_id.filter(|s| !s.is_empty())?;
        Some(Trial {
            id,
            title: self.title.unwrap_or_default(),
            location: self.location.unwrap_or_else(|| "Not specified".to_string()),
            phase: normalize_phase(self.phase),
            summary: self.summary.unwrap_or_default(),
        })
    }
}

/// The search service sends phase as a plain string or as a list
/// (e.g. `["PHASE2", "PHASE3"]`); flatten to one display string.
fn normalize_phase(raw: Option<serde_json::Value>) -> String {
    match raw {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("/"),
        _ => String::new(),
    }
}

/// Reply from `POST /search-trials`: either a trial list or an explicit
/// "no results" message.
#[derive(Debug, Default, Deserialize)]
pub struct SearchReply {
    #[serde(default)]
    pub trials: Vec<RawTrial>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SearchReply {
    /// Normalize all trials, dropping records without an identifier.
    pub fn into_trials(self) -> Vec<Trial> {
        self.trials.into_iter().filter_map(RawTrial::normalize).collect()
    }
}

// ═══════════════════════════════════════════════════════════
// Parsed criteria
// ═══════════════════════════════════════════════════════════

/// One eligibility rule extracted by the criteria parsing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionRule {
    #[serde(alias = "text")]
    pub raw_text: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Parsed inclusion/exclusion rules for one trial, with parser metadata.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCriteria {
    #[serde(default, alias = "inclusion")]
    pub inclusion_criteria: Vec<CriterionRule>,
    #[serde(default, alias = "exclusion")]
    pub exclusion_criteria: Vec<CriterionRule>,
    #[serde(default)]
    pub model_used: String,
    /// Parser confidence in [0, 1].
    #[serde(default)]
    pub parsing_confidence: f64,
    #[serde(default)]
    pub total_rules_extracted: u32,
}

// ═══════════════════════════════════════════════════════════
// Patient
// ═══════════════════════════════════════════════════════════

/// One patient phenotype. A minimal record (`detail_loaded == false`)
/// stands in when the detail fetch for that patient failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub id: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub conditions: Vec<String>,
    pub observations: Vec<String>,
    pub medications: Vec<String>,
    pub detail_loaded: bool,
}

impl Patient {
    /// Identifier-only fallback used when the phenotype fetch fails.
    pub fn minimal(id: &str) -> Self {
        Self {
            id: id.to_string(),
            age: None,
            gender: None,
            conditions: Vec::new(),
            observations: Vec::new(),
            medications: Vec::new(),
            detail_loaded: false,
        }
    }
}

/// Reply from `GET /patients?condition=...`.
#[derive(Debug, Default, Deserialize)]
pub struct PatientListReply {
    #[serde(default)]
    pub patients: Vec<PatientRef>,
}

/// Identifier-only patient record from the list endpoint.
#[derive(Debug, Deserialize)]
pub struct PatientRef {
    #[serde(alias = "patient_id")]
    pub id: String,
}

/// Full phenotype as the patient store sends it.
#[derive(Debug, Deserialize)]
pub struct RawPhenotype {
    #[serde(alias = "id")]
    pub patient_id: String,
    #[serde(default)]
    pub demographics: RawDemographics,
    #[serde(default)]
    pub conditions: Vec<RawCodedItem>,
    #[serde(default, alias = "observations")]
    pub lab_results: Vec<RawCodedItem>,
    #[serde(default)]
    pub medications: Vec<RawCodedItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawDemographics {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
}

/// Coded entry whose human-readable label lives under varying keys.
#[derive(Debug, Default, Deserialize)]
pub struct RawCodedItem {
    #[serde(default, alias = "display", alias = "name", alias = "test")]
    pub description: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl RawCodedItem {
    fn label(self) -> Option<String> {
        self.description.or(self.code).filter(|s| !s.is_empty())
    }
}

impl RawPhenotype {
    pub fn normalize(self) -> Patient {
        Patient {
            id: self.patient_id,
            age: self.demographics.age,
            gender: self.demographics.gender,
            conditions: labels(self.conditions),
            observations: labels(self.lab_results),
            medications: labels(self.medications),
            detail_loaded: true,
        }
    }
}

fn labels(items: Vec<RawCodedItem>) -> Vec<String> {
    items.into_iter().filter_map(RawCodedItem::label).collect()
}

// ═══════════════════════════════════════════════════════════
// Match results
// ═══════════════════════════════════════════════════════════

/// Whether a criterion is an inclusion or an exclusion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    Inclusion,
    Exclusion,
}

/// Per-criterion evaluation detail inside a match result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionMatch {
    #[serde(default = "CriterionMatch::default_kind")]
    pub kind: CriterionKind,
    #[serde(default, alias = "type")]
    pub criterion_type: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default, alias = "value")]
    pub expected_value: serde_json::Value,
    #[serde(default)]
    pub patient_value: serde_json::Value,
    #[serde(default, alias = "meets")]
    pub matched: bool,
}

impl CriterionMatch {
    fn default_kind() -> CriterionKind {
        CriterionKind::Inclusion
    }
}

/// Per-patient compatibility outcome for one trial. The matching service
/// produces these wholesale; this side only sorts and classifies, never
/// mutates criterion content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub patient_id: String,
    /// 1-based, stable for equal scores by insertion order.
    pub rank: u32,
    /// Opaque service-supplied score; never recomputed here.
    #[serde(default)]
    pub score: f64,
    /// Opaque service-supplied match percentage in [0, 100].
    #[serde(default, alias = "match_percentage")]
    pub percentage: f64,
    #[serde(default, alias = "criteria_matches")]
    pub criteria: Vec<CriterionMatch>,
}

/// Reply from `POST /match-trial`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MatchReply {
    #[serde(default)]
    pub ranked_results: Vec<MatchResult>,
    #[serde(default)]
    pub exclusion_count: u32,
}

// ═══════════════════════════════════════════════════════════
// Health & initialization
// ═══════════════════════════════════════════════════════════

/// Reply from `GET /live`.
#[derive(Debug, Deserialize)]
pub struct LivenessReply {
    #[serde(default)]
    pub status: String,
}

impl LivenessReply {
    pub fn is_alive(&self) -> bool {
        self.status == "alive"
    }
}

/// Reply from `GET /initialization-status`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializationStatus {
    #[serde(default)]
    pub is_initialized: bool,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: InitializationProgress,
}

/// Data-loading counters reported during patient-store startup.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializationProgress {
    #[serde(default)]
    pub files_processed: u32,
    #[serde(default)]
    pub total_files: u32,
    #[serde(default)]
    pub patients: u64,
    #[serde(default)]
    pub conditions: u64,
    #[serde(default)]
    pub observations: u64,
    #[serde(default)]
    pub medications: u64,
}
