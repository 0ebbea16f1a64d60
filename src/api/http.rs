//! `reqwest`-backed implementations of the backend and agent contracts.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};

use super::models::{
    AcquisitionStartRequest, AgentStatusResponse, CalibrationPointRequest, SessionEventRequest,
    SessionStartRequest, SessionStartResponse,
};
use super::{AgentApi, BackendApi, ProbeError, StatusProbe};
use crate::config::TestConfig;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .context("building HTTP client")
}

fn classify_send_error(err: reqwest::Error, direct: bool) -> ProbeError {
    if err.is_timeout() || err.is_connect() {
        return ProbeError::Unreachable(err.to_string());
    }
    if direct && (err.is_builder() || err.is_request()) {
        // The request never reached the agent; on a loopback deployment this
        // is the security-rejection class, not a dead agent.
        return ProbeError::Blocked(err.to_string());
    }
    ProbeError::Unreachable(err.to_string())
}

/// Backend client. Carries the optional `X-API-Key` header on every call.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    status_timeout: Duration,
}

impl HttpBackend {
    pub fn new(client: Client, config: &TestConfig) -> Self {
        Self {
            client,
            base_url: config.api_base_url.clone(),
            api_key: config.api_key.clone(),
            status_timeout: config.status_timeout(),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }
        builder
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn start_session(&self, session_uid: Option<&str>) -> Result<SessionStartResponse> {
        let url = format!("{}/session/start", self.base_url);
        let body = SessionStartRequest {
            session_uid: session_uid.map(str::to_owned),
        };
        let response = self
            .request(Method::POST, &url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        response
            .json()
            .await
            .context("decoding session/start response")
    }

    async fn stop_session(&self) -> Result<()> {
        let url = format!("{}/session/stop", self.base_url);
        self.request(Method::POST, &url)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        Ok(())
    }

    async fn log_event(&self, event: &SessionEventRequest) -> Result<()> {
        let url = format!("{}/session/event", self.base_url);
        self.request(Method::POST, &url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        Ok(())
    }

    async fn compute_features(&self, session_uid: &str) -> Result<serde_json::Value> {
        let url = format!("{}/features/compute/{session_uid}", self.base_url);
        let response = self
            .request(Method::POST, &url)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        response
            .json()
            .await
            .context("decoding features/compute response")
    }
}

#[async_trait]
impl StatusProbe for HttpBackend {
    /// Proxied probe. Failures here never count as the blocked class — the
    /// backend is an ordinary remote host.
    async fn probe_status(&self) -> Result<AgentStatusResponse, ProbeError> {
        let url = format!("{}/agent/status", self.base_url);
        let response = self
            .request(Method::GET, &url)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|err| classify_send_error(err, false))?;
        if !response.status().is_success() {
            return Err(ProbeError::Unreachable(format!(
                "status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ProbeError::Malformed(err.to_string()))
    }
}

/// Local agent client. No auth: the agent only listens on loopback.
#[derive(Clone)]
pub struct HttpAgent {
    client: Client,
    base_url: String,
    status_timeout: Duration,
}

impl HttpAgent {
    pub fn new(client: Client, config: &TestConfig) -> Self {
        Self {
            client,
            base_url: config.agent_base_url.clone(),
            status_timeout: config.status_timeout(),
        }
    }

    async fn post(&self, path: &str) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        Ok(())
    }

    async fn post_json<T: serde::Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        Ok(())
    }
}

#[async_trait]
impl AgentApi for HttpAgent {
    async fn calibrate_start(&self) -> Result<()> {
        self.post("/calibrate/start").await
    }

    async fn calibrate_point(&self, point: &CalibrationPointRequest) -> Result<()> {
        self.post_json("/calibrate/point", point).await
    }

    async fn calibrate_finish(&self) -> Result<()> {
        self.post("/calibrate/finish").await
    }

    async fn start_acquisition(&self, request: &AcquisitionStartRequest) -> Result<()> {
        self.post_json("/start", request).await
    }

    async fn stop_acquisition(&self) -> Result<()> {
        self.post("/stop").await
    }
}

#[async_trait]
impl StatusProbe for HttpAgent {
    async fn probe_status(&self) -> Result<AgentStatusResponse, ProbeError> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|err| classify_send_error(err, true))?;
        if !response.status().is_success() {
            return Err(ProbeError::Unreachable(format!(
                "status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ProbeError::Malformed(err.to_string()))
    }
}
