//! HTTP seams for the two external collaborators: the backend API and the
//! local eye-tracking agent. Both sit behind traits so the orchestrator and
//! its tests never touch a socket directly.

pub mod http;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub use http::{HttpAgent, HttpBackend};
pub use models::{
    AcquisitionStartRequest, AgentStatusResponse, CalibrationPointRequest, SessionEventRequest,
    SessionEventType, SessionStartRequest, SessionStartResponse,
};

/// Why a status probe failed. The liveness monitor maps these onto its
/// connection states, so the distinction between "nothing is listening" and
/// "the request was blocked before it left" must survive the client layer.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connect failure, timeout, or a non-2xx status.
    #[error("agent status endpoint unreachable: {0}")]
    Unreachable(String),
    /// The request was rejected before reaching the agent (the loopback
    /// security class). Only direct-agent probes report this.
    #[error("agent status request blocked: {0}")]
    Blocked(String),
    /// 2xx with a body we could not decode.
    #[error("malformed agent status payload: {0}")]
    Malformed(String),
}

/// Something that can answer "is the agent up" — the agent itself, or the
/// backend relaying on its behalf.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe_status(&self) -> Result<AgentStatusResponse, ProbeError>;
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Starts (or resumes) a backend session. The response carries the
    /// authoritative `session_uid`.
    async fn start_session(&self, session_uid: Option<&str>) -> Result<SessionStartResponse>;

    async fn stop_session(&self) -> Result<()>;

    async fn log_event(&self, event: &SessionEventRequest) -> Result<()>;

    async fn compute_features(&self, session_uid: &str) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn calibrate_start(&self) -> Result<()>;

    async fn calibrate_point(&self, point: &CalibrationPointRequest) -> Result<()>;

    async fn calibrate_finish(&self) -> Result<()>;

    async fn start_acquisition(&self, request: &AcquisitionStartRequest) -> Result<()>;

    async fn stop_acquisition(&self) -> Result<()>;
}
