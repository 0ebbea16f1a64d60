//! Wire types for the backend and agent HTTP contracts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SessionStartRequest {
    pub session_uid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartResponse {
    pub session_uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    StimulusOnset,
    Response,
}

/// One row in the backend event log. `timestamp` is seconds since epoch.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEventRequest {
    pub session_uid: String,
    pub timestamp: f64,
    pub event_type: SessionEventType,
    pub stimulus: String,
    /// `true` means the participant pressed the response key, regardless of
    /// whether pressing was correct. Absent on stimulus-onset events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationPointRequest {
    pub session_uid: String,
    /// Screen-relative percentage, 0-100.
    pub x: f64,
    pub y: f64,
    /// Dwell time in seconds.
    pub duration: f64,
    pub samples: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionStartRequest {
    pub session_uid: String,
    /// Backend endpoint the agent streams gaze batches to.
    pub api_url: String,
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatusResponse {
    pub status: String,
}

impl AgentStatusResponse {
    pub fn is_connected(&self) -> bool {
        self.status == "connected"
    }
}
