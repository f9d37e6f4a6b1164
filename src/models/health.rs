use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub ok: bool,
    pub redis: ServiceState,
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResponse {
    pub fn up(timestamp: String, response_time_ms: u64) -> Self {
        Self {
            ok: true,
            redis: ServiceState::Up,
            timestamp,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn down(timestamp: String, error: String) -> Self {
        Self {
            ok: false,
            redis: ServiceState::Down,
            timestamp,
            response_time_ms: None,
            error: Some(error),
        }
    }
}
