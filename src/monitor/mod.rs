//! Polling-based liveness tracking of the local eye-tracking agent.
//!
//! The monitor owns its poll loop; the orchestrator only reads the current
//! state (and optionally listens for the ready edge). Failures are never
//! escalated — they only move the published state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{ProbeError, StatusProbe};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentConnectionState {
    /// No probe has completed yet.
    Checking,
    Connected,
    Disconnected,
    /// The probe was blocked before reaching the agent; retrying on the poll
    /// cadence will not help, the user has to switch access paths.
    Error,
}

pub struct AgentLivenessMonitor {
    state_rx: watch::Receiver<AgentConnectionState>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AgentLivenessMonitor {
    /// Spawns the poll loop. The first probe fires immediately, then every
    /// `poll_interval`. `ready_tx` receives one signal per
    /// not-connected -> connected transition.
    pub fn start(
        probe: Arc<dyn StatusProbe>,
        poll_interval: Duration,
        ready_tx: Option<mpsc::UnboundedSender<()>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(AgentConnectionState::Checking);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            poll_loop(probe, poll_interval, state_tx, ready_tx, token).await;
        });

        Self {
            state_rx,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> AgentConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentConnectionState> {
        self.state_rx.clone()
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AgentLivenessMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    probe: Arc<dyn StatusProbe>,
    poll_interval: Duration,
    state_tx: watch::Sender<AgentConnectionState>,
    ready_tx: Option<mpsc::UnboundedSender<()>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let next = match probe.probe_status().await {
                    Ok(body) if body.is_connected() => AgentConnectionState::Connected,
                    Ok(body) => {
                        log_info!("agent reported status '{}'", body.status);
                        AgentConnectionState::Disconnected
                    }
                    Err(ProbeError::Blocked(reason)) => {
                        log_warn!("agent probe blocked: {reason}");
                        AgentConnectionState::Error
                    }
                    Err(err) => {
                        log_info!("agent probe failed: {err}");
                        AgentConnectionState::Disconnected
                    }
                };

                let prev = *state_tx.borrow();
                if prev != next {
                    log_info!("agent connection {prev:?} -> {next:?}");
                    let _ = state_tx.send(next);
                    if next == AgentConnectionState::Connected {
                        if let Some(tx) = &ready_tx {
                            let _ = tx.send(());
                        }
                    }
                }
            }
            _ = cancel.cancelled() => {
                log_info!("liveness poll shutting down");
                break;
            }
        }
    }
}
