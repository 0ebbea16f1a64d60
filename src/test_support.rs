//! Recording fakes for the backend/agent seams, shared by the async tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::api::{
    AcquisitionStartRequest, AgentApi, AgentStatusResponse, BackendApi, CalibrationPointRequest,
    ProbeError, SessionEventRequest, SessionStartResponse, StatusProbe,
};

#[derive(Default)]
pub(crate) struct RecordingAgent {
    pub calls: Mutex<Vec<String>>,
    pub fail: Mutex<HashSet<String>>,
    pub fail_at: Mutex<HashMap<String, usize>>,
    pub seen: Mutex<HashMap<String, usize>>,
    pub connected: Mutex<bool>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self {
            connected: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn fail_on(&self, op: &str) {
        self.fail.lock().unwrap().insert(op.to_string());
    }

    /// Fail only the `nth` (1-based) invocation of `op`.
    pub fn fail_on_nth(&self, op: &str, nth: usize) {
        self.fail_at.lock().unwrap().insert(op.to_string(), nth);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, op: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        let count = {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(op.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if self.fail.lock().unwrap().contains(op) {
            return Err(anyhow!("injected {op} failure"));
        }
        if self.fail_at.lock().unwrap().get(op) == Some(&count) {
            return Err(anyhow!("injected {op} failure on call {count}"));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentApi for RecordingAgent {
    async fn calibrate_start(&self) -> Result<()> {
        self.record("calibrate_start".into(), "calibrate_start")
    }

    async fn calibrate_point(&self, point: &CalibrationPointRequest) -> Result<()> {
        let op = format!("calibrate_point {},{}", point.x, point.y);
        self.record(op, "calibrate_point")
    }

    async fn calibrate_finish(&self) -> Result<()> {
        self.record("calibrate_finish".into(), "calibrate_finish")
    }

    async fn start_acquisition(&self, request: &AcquisitionStartRequest) -> Result<()> {
        let op = format!("start_acquisition {}", request.session_uid);
        self.record(op, "start_acquisition")
    }

    async fn stop_acquisition(&self) -> Result<()> {
        self.record("stop_acquisition".into(), "stop_acquisition")
    }
}

#[async_trait]
impl StatusProbe for RecordingAgent {
    async fn probe_status(&self) -> Result<AgentStatusResponse, ProbeError> {
        let status = if *self.connected.lock().unwrap() {
            "connected"
        } else {
            "disconnected"
        };
        Ok(AgentStatusResponse {
            status: status.into(),
        })
    }
}

pub(crate) struct RecordingBackend {
    pub calls: Mutex<Vec<String>>,
    pub fail: Mutex<HashSet<String>>,
    pub events: Mutex<Vec<SessionEventRequest>>,
    pub issued_uid: String,
}

impl RecordingBackend {
    pub fn new(issued_uid: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: Mutex::new(HashSet::new()),
            events: Mutex::new(Vec::new()),
            issued_uid: issued_uid.to_string(),
        }
    }

    pub fn fail_on(&self, op: &str) {
        self.fail.lock().unwrap().insert(op.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SessionEventRequest> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, call: String, op: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail.lock().unwrap().contains(op) {
            return Err(anyhow!("injected {op} failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for RecordingBackend {
    async fn start_session(&self, session_uid: Option<&str>) -> Result<SessionStartResponse> {
        let call = format!("start_session {}", session_uid.unwrap_or("-"));
        self.record(call, "start_session")?;
        Ok(SessionStartResponse {
            session_uid: self.issued_uid.clone(),
        })
    }

    async fn stop_session(&self) -> Result<()> {
        self.record("stop_session".into(), "stop_session")
    }

    async fn log_event(&self, event: &SessionEventRequest) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        self.record(format!("log_event {:?}", event.event_type), "log_event")
    }

    async fn compute_features(&self, session_uid: &str) -> Result<serde_json::Value> {
        self.record(format!("compute_features {session_uid}"), "compute_features")?;
        Ok(serde_json::json!({ "session_uid": session_uid }))
    }
}
