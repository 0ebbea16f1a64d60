//! Backend session lifecycle and agent acquisition control for a main test
//! run, plus the fire-and-forget event log.
//!
//! Ordering is enforced by the orchestrator: the session must exist before
//! acquisition starts, and acquisition before the first stimulus. This
//! module owns the single writable `session_uid` binding — whatever
//! `/session/start` returns replaces any identifier carried over from
//! intake.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{error, info};

use crate::api::{
    AcquisitionStartRequest, AgentApi, BackendApi, SessionEventRequest, SessionEventType,
};

pub struct SessionLifecycleManager {
    backend: Arc<dyn BackendApi>,
    agent: Arc<dyn AgentApi>,
    acquisition_batch_url: String,
    acquisition_fps: f64,
    session_uid: Option<String>,
    session_started: bool,
    acquisition_active: bool,
}

impl SessionLifecycleManager {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        agent: Arc<dyn AgentApi>,
        acquisition_batch_url: String,
        acquisition_fps: f64,
    ) -> Self {
        Self {
            backend,
            agent,
            acquisition_batch_url,
            acquisition_fps,
            session_uid: None,
            session_started: false,
            acquisition_active: false,
        }
    }

    /// Seeds the identifier carried over from the intake step.
    pub fn bind_session(&mut self, session_uid: String) {
        self.session_uid = Some(session_uid);
    }

    pub fn session_uid(&self) -> Option<&str> {
        self.session_uid.as_deref()
    }

    pub fn acquisition_active(&self) -> bool {
        self.acquisition_active
    }

    /// Starts the backend session. The returned uid is authoritative and
    /// replaces the bound identifier for every later call.
    pub async fn start_session(&mut self) -> Result<String> {
        let response = self
            .backend
            .start_session(self.session_uid.as_deref())
            .await
            .context("starting backend session")?;
        self.session_uid = Some(response.session_uid.clone());
        self.session_started = true;
        Ok(response.session_uid)
    }

    pub async fn start_acquisition(&mut self) -> Result<()> {
        let Some(session_uid) = self.session_uid.clone() else {
            bail!("acquisition requested before a session was bound");
        };
        let request = AcquisitionStartRequest {
            session_uid,
            api_url: self.acquisition_batch_url.clone(),
            fps: self.acquisition_fps,
        };
        self.agent
            .start_acquisition(&request)
            .await
            .context("starting acquisition")?;
        self.acquisition_active = true;
        Ok(())
    }

    /// Logs a stimulus-onset event. Fire-and-forget: failures are logged and
    /// must never delay trial timing.
    pub fn log_stimulus_onset(&self, stimulus: char) {
        let Some(session_uid) = self.session_uid.clone() else {
            return;
        };
        let event = SessionEventRequest {
            session_uid,
            timestamp: epoch_seconds(),
            event_type: SessionEventType::StimulusOnset,
            stimulus: stimulus.to_string(),
            response: None,
        };
        self.spawn_log(event);
    }

    /// Logs a response event. `responded` records whether the key was
    /// pressed, independent of whether pressing was correct.
    pub fn log_response(&self, stimulus: char, responded: bool) {
        let Some(session_uid) = self.session_uid.clone() else {
            return;
        };
        let event = SessionEventRequest {
            session_uid,
            timestamp: epoch_seconds(),
            event_type: SessionEventType::Response,
            stimulus: stimulus.to_string(),
            response: Some(responded),
        };
        self.spawn_log(event);
    }

    fn spawn_log(&self, event: SessionEventRequest) {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(err) = backend.log_event(&event).await {
                error!("failed to log session event: {err:#}");
            }
        });
    }

    pub async fn stop_acquisition(&mut self) -> Result<()> {
        self.agent
            .stop_acquisition()
            .await
            .context("stopping acquisition")?;
        self.acquisition_active = false;
        Ok(())
    }

    pub async fn stop_session(&mut self) -> Result<()> {
        self.backend.stop_session().await.context("stopping session")?;
        self.session_started = false;
        Ok(())
    }

    /// Teardown for a completed main test: stop acquisition, stop the
    /// session, then request feature computation. Each step is best-effort;
    /// features are requested even when a stop call failed.
    pub async fn cleanup(&mut self) {
        if self.acquisition_active {
            if let Err(err) = self.stop_acquisition().await {
                error!("cleanup: {err:#}");
            }
        }
        if let Err(err) = self.stop_session().await {
            error!("cleanup: {err:#}");
        }
        if let Some(session_uid) = self.session_uid.clone() {
            match self.backend.compute_features(&session_uid).await {
                Ok(_) => info!("features computed for session {session_uid}"),
                Err(err) => error!("cleanup: feature computation failed: {err:#}"),
            }
        }
    }

    /// Teardown for an aborted run: stop whatever was started, skip feature
    /// computation. Errors are logged and swallowed.
    pub async fn abort_teardown(&mut self) {
        if self.acquisition_active {
            if let Err(err) = self.stop_acquisition().await {
                error!("abort: {err:#}");
            }
        }
        if self.session_started {
            if let Err(err) = self.stop_session().await {
                error!("abort: {err:#}");
            }
        }
    }
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
