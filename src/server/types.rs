//! API request and response types.

use crate::cache::BuildStatus;
use serde::{Deserialize, Serialize};

/// Wrapper for JSON API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Query parameters for the package search page.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

/// Query parameters for the symbol search endpoint.
#[derive(Debug, Deserialize)]
pub struct SymbolParams {
    pub symbol: String,
    /// Restrict the search to one package.
    #[serde(default)]
    pub pkg: Option<String>,
}

/// Coarse lifecycle phase reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPhase {
    Waiting,
    Building,
    Done,
    Unknown,
}

/// Response body of `/api/v1/status/{name}`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: StatusPhase,
    pub build_time: i64,
}

impl StatusResponse {
    pub fn unknown() -> Self {
        Self {
            status: StatusPhase::Unknown,
            build_time: 0,
        }
    }
}

/// Map orchestrator state to the coarse phase exposed over the API.
pub fn phase_of(waiting: bool, building: bool, status: Option<BuildStatus>) -> StatusPhase {
    if building {
        StatusPhase::Building
    } else if waiting {
        StatusPhase::Waiting
    } else if status.is_some_and(|s| s.is_terminal()) {
        StatusPhase::Done
    } else {
        StatusPhase::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(phase_of(false, true, None), StatusPhase::Building);
        assert_eq!(phase_of(true, false, None), StatusPhase::Waiting);
        assert_eq!(
            phase_of(false, false, Some(BuildStatus::Ok)),
            StatusPhase::Done
        );
        assert_eq!(
            phase_of(false, false, Some(BuildStatus::Failed)),
            StatusPhase::Done
        );
        assert_eq!(phase_of(false, false, None), StatusPhase::Unknown);
        assert_eq!(
            phase_of(false, false, Some(BuildStatus::Waiting)),
            StatusPhase::Unknown
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let body = serde_json::to_string(&StatusResponse {
            status: StatusPhase::Building,
            build_time: 42,
        })
        .unwrap();
        assert_eq!(body, r#"{"status":"building","build_time":42}"#);
    }
}
