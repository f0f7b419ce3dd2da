use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Trialmatch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-request timeout for all backend calls, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default cap on ranked results requested from the matching service.
pub const DEFAULT_MATCH_LIMIT: u32 = 100;

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    "info,trialmatch=debug"
}

/// Base URLs for the four backend services.
///
/// Each service is an independent process; the defaults match the
/// local compose layout (ports 8001-8004).
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    /// Trial search service (POST /search-trials).
    pub search_base_url: String,
    /// Criteria parsing service (GET /parsed-criteria/{id}).
    pub criteria_base_url: String,
    /// Patient phenotype store (GET /patients, /patients/{id}/phenotype,
    /// /live, /initialization-status).
    pub patients_base_url: String,
    /// Matching service (POST /match-trial).
    pub matching_base_url: String,
}

impl ServiceEndpoints {
    /// Read endpoints from the environment, falling back to local defaults.
    pub fn from_env() -> Self {
        Self {
            search_base_url: env_url("SEARCH_BASE_URL", "http://localhost:8001"),
            criteria_base_url: env_url("CRITERIA_BASE_URL", "http://localhost:8002"),
            patients_base_url: env_url("PATIENTS_BASE_URL", "http://localhost:8003"),
            matching_base_url: env_url("MATCHING_BASE_URL", "http://localhost:8004"),
        }
    }

    /// All-local defaults without consulting the environment.
    pub fn default_local() -> Self {
        Self {
            search_base_url: "http://localhost:8001".to_string(),
            criteria_base_url: "http://localhost:8002".to_string(),
            patients_base_url: "http://localhost:8003".to_string(),
            matching_base_url: "http://localhost:8004".to_string(),
        }
    }
}

fn env_url(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .unwrap_or_else(|_| fallback.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Period of the slower liveness poll (default 15s).
pub fn liveness_poll_period() -> Duration {
    Duration::from_secs(env_secs("TRIALMATCH_LIVENESS_POLL_SECS", 15))
}

/// Period of the fast initialization-progress poll (default 5s).
pub fn progress_poll_period() -> Duration {
    Duration::from_secs(env_secs("TRIALMATCH_PROGRESS_POLL_SECS", 5))
}

fn env_secs(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoints_are_local() {
        let ep = ServiceEndpoints::default_local();
        assert!(ep.search_base_url.starts_with("http://localhost"));
        assert!(ep.matching_base_url.ends_with("8004"));
    }

    #[test]
    fn env_url_trims_trailing_slash() {
        assert_eq!(
            env_url("TRIALMATCH_TEST_UNSET_URL", "http://localhost:9999/"),
            "http://localhost:9999"
        );
    }

    #[test]
    fn progress_poll_is_faster_than_liveness_poll() {
        assert!(progress_poll_period() < liveness_poll_period());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
