//! Go/No-Go test-session orchestration for a camera-based attention
//! screening flow.
//!
//! The crate coordinates a timed stimulus state machine with three external
//! collaborators: the participant's keyboard, a backend API (session
//! lifecycle, event log, feature computation), and a locally-installed
//! eye-tracking agent reached over loopback HTTP. The UI layer stays thin:
//! it forwards keydowns into [`TestOrchestrator::handle_key`] and renders
//! the [`TestEvent`] stream.
//!
//! Typical wiring:
//!
//! ```no_run
//! use gonogo::{TestConfig, TestRuntime};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut runtime = TestRuntime::start(TestConfig::from_env(), None)?;
//! while let Some(_event) = runtime.events.recv().await {
//!     // render
//! }
//! # Ok(())
//! # }
//! ```

mod utils;

pub mod api;
pub mod calibration;
pub mod config;
pub mod events;
pub mod intake;
pub mod monitor;
pub mod orchestrator;
pub mod session;
pub mod trials;

#[cfg(test)]
mod test_support;

pub use config::TestConfig;
pub use events::TestEvent;
pub use intake::{IntakeRecord, IntakeStore};
pub use monitor::{AgentConnectionState, AgentLivenessMonitor};
pub use orchestrator::{Key, Phase, TestOrchestrator, TestSnapshot};
pub use session::SessionLifecycleManager;
pub use trials::{BatchSummary, Trial, TrialKind, TrialOutcome};

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use api::{http, AgentApi, BackendApi, StatusProbe};

/// Initializes logging (reads `RUST_LOG`).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

/// Orchestrator, liveness monitor, and event stream wired over live HTTP
/// endpoints. Must be created inside a tokio runtime.
pub struct TestRuntime {
    pub orchestrator: TestOrchestrator,
    pub monitor: AgentLivenessMonitor,
    pub events: mpsc::UnboundedReceiver<TestEvent>,
}

impl TestRuntime {
    pub fn start(config: TestConfig, intake_session_uid: Option<String>) -> Result<Self> {
        let client = http::build_client()?;
        let backend = Arc::new(http::HttpBackend::new(client.clone(), &config));
        let agent = Arc::new(http::HttpAgent::new(client, &config));

        let probe: Arc<dyn StatusProbe> = if config.proxy_agent_status {
            Arc::clone(&backend) as Arc<dyn StatusProbe>
        } else {
            Arc::clone(&agent) as Arc<dyn StatusProbe>
        };
        let monitor = AgentLivenessMonitor::start(probe, config.status_poll_interval(), None);

        let (events_tx, events) = mpsc::unbounded_channel();
        let orchestrator = TestOrchestrator::new(
            config,
            backend as Arc<dyn BackendApi>,
            agent as Arc<dyn AgentApi>,
            monitor.subscribe(),
            events_tx,
            intake_session_uid,
        );

        Ok(Self {
            orchestrator,
            monitor,
            events,
        })
    }

    pub async fn shutdown(&mut self) {
        self.orchestrator.shutdown().await;
        self.monitor.stop().await;
    }
}
