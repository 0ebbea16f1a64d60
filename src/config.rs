use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for one test session.
///
/// Defaults mirror the deployed screening flow; every timing knob is
/// injectable so tests can shrink delays to milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Backend base URL (session lifecycle, event log, feature computation).
    pub api_base_url: String,
    /// Local agent base URL (loopback).
    pub agent_base_url: String,
    /// Optional API key sent as `X-API-Key` on backend calls.
    pub api_key: Option<String>,
    /// Poll agent status through the backend proxy instead of loopback.
    pub proxy_agent_status: bool,

    /// A Go response slower than this is scored TooSlow.
    pub response_time_limit_ms: u64,
    /// How long a stimulus stays on screen before the trial times out.
    pub stimulus_display_ms: u64,
    /// Practice-mode feedback window before the next trial.
    pub feedback_display_ms: u64,
    /// Main-test delay between a keypress and the next trial.
    pub response_advance_delay_ms: u64,
    pub practice_trials: usize,
    pub main_test_trials: usize,
    /// Fraction of Go trials in a batch. The rest are No-Go.
    pub go_trial_ratio: f64,

    /// Armed escape confirmation disarms itself after this long.
    pub escape_confirmation_ms: u64,

    /// Gaze dwell per calibration dot, also the inter-dot delay.
    pub calibration_point_ms: u64,
    /// Gaze samples the agent collects per dot.
    pub calibration_samples: u32,

    pub status_poll_interval_ms: u64,
    pub status_timeout_ms: u64,

    pub acquisition_fps: f64,
    /// Pause after session start so the agent camera can come up.
    pub session_stabilize_ms: u64,
    /// Pause after acquisition start before the first stimulus.
    pub acquisition_stabilize_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            agent_base_url: "http://localhost:9000".into(),
            api_key: None,
            proxy_agent_status: false,
            response_time_limit_ms: 2000,
            stimulus_display_ms: 2000,
            feedback_display_ms: 1000,
            response_advance_delay_ms: 500,
            practice_trials: 10,
            main_test_trials: 100,
            go_trial_ratio: 0.8,
            escape_confirmation_ms: 5000,
            calibration_point_ms: 1000,
            calibration_samples: 30,
            status_poll_interval_ms: 3000,
            status_timeout_ms: 2000,
            acquisition_fps: 20.0,
            session_stabilize_ms: 2000,
            acquisition_stabilize_ms: 1000,
        }
    }
}

impl TestConfig {
    /// Defaults overridden by `GONOGO_API_URL`, `GONOGO_AGENT_URL` and
    /// `GONOGO_API_KEY` where set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GONOGO_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("GONOGO_AGENT_URL") {
            config.agent_base_url = url;
        }
        if let Ok(key) = std::env::var("GONOGO_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        config
    }

    /// Where the agent streams gaze samples during acquisition.
    pub fn acquisition_batch_url(&self) -> String {
        format!("{}/acquisition/batch", self.api_base_url)
    }

    pub fn stimulus_display(&self) -> Duration {
        Duration::from_millis(self.stimulus_display_ms)
    }

    pub fn feedback_display(&self) -> Duration {
        Duration::from_millis(self.feedback_display_ms)
    }

    pub fn response_advance_delay(&self) -> Duration {
        Duration::from_millis(self.response_advance_delay_ms)
    }

    pub fn escape_confirmation(&self) -> Duration {
        Duration::from_millis(self.escape_confirmation_ms)
    }

    pub fn calibration_point_delay(&self) -> Duration {
        Duration::from_millis(self.calibration_point_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn session_stabilize(&self) -> Duration {
        Duration::from_millis(self.session_stabilize_ms)
    }

    pub fn acquisition_stabilize(&self) -> Duration {
        Duration::from_millis(self.acquisition_stabilize_ms)
    }
}
