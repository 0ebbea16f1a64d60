//! Top-level test-session controller.
//!
//! Owns the phase state machine and every timer that can touch it: the
//! stimulus deadline, the practice feedback window, the main-test advance
//! delay, and the escape-confirmation auto-disarm. Timers carry the run id
//! they were scheduled under; a timer firing against a newer run or an
//! already-finalized trial must be a no-op.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{error, info};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use super::state::{dispatch_key, Key, KeyAction, Phase, TestState};
use crate::api::{AgentApi, BackendApi};
use crate::calibration::{CalibrationController, CalibrationUpdate, CALIBRATION_DONE_STEP};
use crate::config::TestConfig;
use crate::events::TestEvent;
use crate::monitor::AgentConnectionState;
use crate::session::SessionLifecycleManager;
use crate::trials::{self, TrialOutcome};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSnapshot {
    pub phase: Phase,
    pub calibration_step: u8,
    pub calibration_error: Option<String>,
    pub trial_index: usize,
    pub trial_total: usize,
    /// The stimulus currently awaiting a response, if any.
    pub current_stimulus: Option<char>,
    pub is_practice: bool,
    pub escape_armed: bool,
    pub session_uid: Option<String>,
}

#[derive(Clone)]
pub struct TestOrchestrator {
    state: Arc<Mutex<TestState>>,
    session: Arc<Mutex<SessionLifecycleManager>>,
    calibration: Arc<Mutex<CalibrationController>>,
    agent_state: watch::Receiver<AgentConnectionState>,
    events: mpsc::UnboundedSender<TestEvent>,
    config: Arc<TestConfig>,
    deadline_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    advance_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    escape_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    calibration_pump: Arc<Mutex<Option<JoinHandle<()>>>>,
    status_forwarder: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TestOrchestrator {
    /// `intake_session_uid` is the identifier left behind by the intake
    /// questionnaire; when absent one is minted locally so calibration calls
    /// are still tagged. Either way, `/session/start` replaces it for the
    /// main test.
    pub fn new(
        config: TestConfig,
        backend: Arc<dyn BackendApi>,
        agent: Arc<dyn AgentApi>,
        agent_state: watch::Receiver<AgentConnectionState>,
        events: mpsc::UnboundedSender<TestEvent>,
        intake_session_uid: Option<String>,
    ) -> Self {
        let mut session = SessionLifecycleManager::new(
            Arc::clone(&backend),
            Arc::clone(&agent),
            config.acquisition_batch_url(),
            config.acquisition_fps,
        );
        session.bind_session(intake_session_uid.unwrap_or_else(|| Uuid::new_v4().to_string()));

        let calibration = CalibrationController::new(
            Arc::clone(&agent),
            config.calibration_point_delay(),
            config.calibration_samples,
        );

        // Relay liveness changes to the UI event stream so the status
        // indicator tracks the poll without the orchestrator polling itself.
        let forwarder = {
            let mut agent_state = agent_state.clone();
            let events = events.clone();
            tokio::spawn(async move {
                while agent_state.changed().await.is_ok() {
                    let state = *agent_state.borrow();
                    let _ = events.send(TestEvent::AgentStatusChanged { state });
                }
            })
        };

        Self {
            state: Arc::new(Mutex::new(TestState::new())),
            session: Arc::new(Mutex::new(session)),
            calibration: Arc::new(Mutex::new(calibration)),
            agent_state,
            events,
            config: Arc::new(config),
            deadline_task: Arc::new(Mutex::new(None)),
            advance_task: Arc::new(Mutex::new(None)),
            escape_task: Arc::new(Mutex::new(None)),
            calibration_pump: Arc::new(Mutex::new(None)),
            status_forwarder: Arc::new(Mutex::new(Some(forwarder))),
        }
    }

    pub async fn snapshot(&self) -> TestSnapshot {
        let state = self.state.lock().await;
        let current_stimulus = if state.trial_started_at.is_some() && !state.response_handled {
            state.current_trial().map(|trial| trial.stimulus)
        } else {
            None
        };
        let snapshot = TestSnapshot {
            phase: state.phase,
            calibration_step: state.calibration_step,
            calibration_error: state.calibration_error.clone(),
            trial_index: state.trial_index,
            trial_total: state.trials.len(),
            current_stimulus,
            is_practice: state.is_practice,
            escape_armed: state.escape_armed,
            session_uid: None,
        };
        drop(state);
        TestSnapshot {
            session_uid: self.session.lock().await.session_uid().map(str::to_owned),
            ..snapshot
        }
    }

    pub fn agent_connected(&self) -> bool {
        *self.agent_state.borrow() == AgentConnectionState::Connected
    }

    /// Single keyboard entry point. The UI forwards every keydown here while
    /// the test view is mounted.
    pub async fn handle_key(&self, key: Key) {
        let action = {
            let state = self.state.lock().await;
            dispatch_key(
                state.phase,
                state.calibration_step,
                state.escape_armed,
                self.agent_connected(),
                key,
            )
        };

        match action {
            KeyAction::Ignore => {}
            KeyAction::ArmEscape => self.arm_escape().await,
            KeyAction::ConfirmAbort => self.abort().await,
            KeyAction::DisarmEscape => self.disarm_escape().await,
            KeyAction::BeginCalibration => self.begin_calibration().await,
            KeyAction::PromptInstall => self.emit(TestEvent::InstallPromptRequested),
            KeyAction::BeginPointSequence => self.begin_point_sequence().await,
            KeyAction::BeginMainTest => self.start_main_test().await,
            KeyAction::RespondToTrial => self.respond_to_trial().await,
        }
    }

    async fn begin_calibration(&self) {
        let started = { self.calibration.lock().await.start().await };
        let failure = started.err().map(|err| {
            error!("failed to start calibration: {err:#}");
            "Failed to start calibration. Check that the backend and local agent are running."
                .to_string()
        });

        {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Instructions {
                return;
            }
            state.phase = Phase::Calibration;
            state.calibration_step = 0;
            state.calibration_error = failure.clone();
        }
        self.emit(TestEvent::PhaseChanged {
            phase: Phase::Calibration,
        });
        if let Some(message) = failure {
            self.emit(TestEvent::CalibrationFailed { step: 0, message });
        }
    }

    async fn begin_point_sequence(&self) {
        let session_uid = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Calibration || state.calibration_step != 0 {
                return;
            }
            // Claim step 1 before the first update lands so a double press
            // cannot start two sequences.
            state.calibration_step = 1;
            state.calibration_error = None;
            drop(state);
            self.session
                .lock()
                .await
                .session_uid()
                .unwrap_or_default()
                .to_string()
        };

        let mut updates = self.calibration.lock().await.begin_sequence(session_uid);
        let this = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                this.apply_calibration_update(update).await;
            }
        });
        if let Some(old) = self.calibration_pump.lock().await.replace(pump) {
            old.abort();
        }
    }

    async fn apply_calibration_update(&self, update: CalibrationUpdate) {
        match update {
            CalibrationUpdate::DotShown(step) => {
                let mut state = self.state.lock().await;
                if state.phase != Phase::Calibration {
                    return;
                }
                state.calibration_step = step;
                drop(state);
                self.emit(TestEvent::CalibrationStepChanged { step });
            }
            CalibrationUpdate::Finished => {
                let mut state = self.state.lock().await;
                if state.phase != Phase::Calibration {
                    return;
                }
                state.calibration_step = CALIBRATION_DONE_STEP;
                drop(state);
                self.emit(TestEvent::CalibrationStepChanged {
                    step: CALIBRATION_DONE_STEP,
                });
            }
            CalibrationUpdate::Failed { step, message } => {
                let mut state = self.state.lock().await;
                state.calibration_error = Some(message.clone());
                drop(state);
                self.emit(TestEvent::CalibrationFailed { step, message });
            }
        }
    }

    /// Calibration-complete choice: run the 10-trial practice round.
    pub async fn start_practice(&self) {
        {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Calibration
                || state.calibration_step != CALIBRATION_DONE_STEP
            {
                return;
            }
            state.is_practice = true;
            state.trials =
                trials::generate_batch(self.config.practice_trials, self.config.go_trial_ratio);
            state.trial_index = 0;
            state.run_id += 1;
            state.phase = Phase::Practice;
        }
        self.emit(TestEvent::PhaseChanged {
            phase: Phase::Practice,
        });
        self.begin_current_trial().await;
    }

    /// Calibration-complete choice (or Enter on the practice-complete
    /// screen): bring up the backend session and acquisition, then run the
    /// main batch. A startup failure leaves the current phase untouched so
    /// the participant can retry.
    pub async fn start_main_test(&self) {
        {
            let mut state = self.state.lock().await;
            let from_calibration = state.phase == Phase::Calibration
                && state.calibration_step == CALIBRATION_DONE_STEP;
            let from_practice = state.phase == Phase::PracticeComplete;
            if !(from_calibration || from_practice) || state.starting_main_test {
                return;
            }
            state.starting_main_test = true;
            state.calibration_error = None;
        }

        match self.bring_up_main_session().await {
            Ok(()) => {
                {
                    let mut state = self.state.lock().await;
                    state.starting_main_test = false;
                    state.is_practice = false;
                    state.trials = trials::generate_batch(
                        self.config.main_test_trials,
                        self.config.go_trial_ratio,
                    );
                    state.trial_index = 0;
                    state.run_id += 1;
                    state.cleanup_done = false;
                    state.phase = Phase::MainTest;
                }
                self.emit(TestEvent::PhaseChanged {
                    phase: Phase::MainTest,
                });
                self.begin_current_trial().await;
            }
            Err(err) => {
                error!("failed to start main test: {err:#}");
                let message =
                    "Failed to start the main test. Check the camera connection and try again."
                        .to_string();
                {
                    let mut state = self.state.lock().await;
                    state.starting_main_test = false;
                    state.calibration_error = Some(message.clone());
                }
                self.emit(TestEvent::MainTestStartFailed { message });
            }
        }
    }

    /// Session first, then acquisition, with stabilization pauses so the
    /// camera does not drop the earliest samples.
    async fn bring_up_main_session(&self) -> Result<()> {
        let session_uid = { self.session.lock().await.start_session().await? };
        info!("main test session {session_uid} started");
        sleep(self.config.session_stabilize()).await;

        { self.session.lock().await.start_acquisition().await? };
        sleep(self.config.acquisition_stabilize()).await;
        Ok(())
    }

    // Returns a boxed `Send` future rather than an opaque `async fn` to break
    // the auto-trait inference cycle between the timer tasks
    // (`begin_current_trial` -> `finalize_timeout` -> `after_finalize` ->
    // `advance` -> `begin_current_trial`, each hop crossing a `tokio::spawn`).
    // The compiler cannot prove `Send` through that cycle of opaque types; a
    // single type-erased boundary here resolves it without changing behavior.
    fn begin_current_trial(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let (run_id, index, total, stimulus, is_practice) = {
                let mut state = self.state.lock().await;
                if !state.phase.is_trial_phase() {
                    return;
                }
                let Some(trial) = state.current_trial() else {
                    return;
                };
                let stimulus = trial.stimulus;
                state.trial_started_at = Some(Instant::now());
                state.response_handled = false;
                (
                    state.run_id,
                    state.trial_index,
                    state.trials.len(),
                    stimulus,
                    state.is_practice,
                )
            };

            self.emit(TestEvent::TrialStarted {
                index,
                total,
                stimulus,
            });
            if !is_practice {
                self.session.lock().await.log_stimulus_onset(stimulus);
            }

            let this = self.clone();
            let deadline = tokio::spawn(async move {
                sleep(this.config.stimulus_display()).await;
                this.finalize_timeout(run_id, index).await;
            });
            if let Some(old) = self.deadline_task.lock().await.replace(deadline) {
                old.abort();
            }
        })
    }

    async fn respond_to_trial(&self) {
        let (run_id, outcome, stimulus, is_practice) = {
            let mut state = self.state.lock().await;
            if !state.phase.is_trial_phase() || state.response_handled {
                return;
            }
            let Some(started_at) = state.trial_started_at else {
                return;
            };
            let elapsed_ms = started_at.elapsed().as_millis() as u64;
            let limit_ms = self.config.response_time_limit_ms;
            let index = state.trial_index;
            let Some(trial) = state.trials.get_mut(index) else {
                return;
            };
            if trial.is_finalized() {
                return;
            }
            let outcome = trial.respond(elapsed_ms, limit_ms);
            let stimulus = trial.stimulus;
            state.response_handled = true;
            (state.run_id, outcome, stimulus, state.is_practice)
        };

        if let Some(deadline) = self.deadline_task.lock().await.take() {
            deadline.abort();
        }
        if !is_practice {
            self.session.lock().await.log_response(stimulus, true);
        }
        self.after_finalize(run_id, is_practice, outcome, false).await;
    }

    async fn finalize_timeout(&self, run_id: u64, index: usize) {
        let (outcome, stimulus, is_practice) = {
            let mut state = self.state.lock().await;
            if state.run_id != run_id
                || state.trial_index != index
                || !state.phase.is_trial_phase()
                || state.response_handled
            {
                return;
            }
            let Some(trial) = state.trials.get_mut(index) else {
                return;
            };
            if trial.is_finalized() {
                return;
            }
            let outcome = trial.expire();
            let stimulus = trial.stimulus;
            state.response_handled = true;
            (outcome, stimulus, state.is_practice)
        };

        if !is_practice {
            self.session.lock().await.log_response(stimulus, false);
        }
        self.after_finalize(run_id, is_practice, outcome, true).await;
    }

    async fn after_finalize(
        &self,
        run_id: u64,
        is_practice: bool,
        outcome: TrialOutcome,
        timed_out: bool,
    ) {
        if is_practice {
            self.emit(TestEvent::FeedbackShown { outcome });
            let this = self.clone();
            let task = tokio::spawn(async move {
                sleep(this.config.feedback_display()).await;
                this.emit(TestEvent::FeedbackCleared);
                this.advance(run_id).await;
            });
            if let Some(old) = self.advance_task.lock().await.replace(task) {
                old.abort();
            }
        } else if timed_out {
            self.advance(run_id).await;
        } else {
            let this = self.clone();
            let task = tokio::spawn(async move {
                sleep(this.config.response_advance_delay()).await;
                this.advance(run_id).await;
            });
            if let Some(old) = self.advance_task.lock().await.replace(task) {
                old.abort();
            }
        }
    }

    async fn advance(&self, run_id: u64) {
        let finished_phase = {
            let mut state = self.state.lock().await;
            if state.run_id != run_id || !state.phase.is_trial_phase() {
                return;
            }
            state.trial_started_at = None;
            if state.trial_index + 1 < state.trials.len() {
                state.trial_index += 1;
                None
            } else {
                state.phase = if state.is_practice {
                    Phase::PracticeComplete
                } else {
                    Phase::Complete
                };
                Some(state.phase)
            }
        };

        match finished_phase {
            None => self.begin_current_trial().await,
            Some(Phase::PracticeComplete) => self.emit(TestEvent::PhaseChanged {
                phase: Phase::PracticeComplete,
            }),
            Some(Phase::Complete) => self.complete().await,
            Some(_) => {}
        }
    }

    /// Runs once per main test, on first entry to `Complete`.
    async fn complete(&self) {
        self.emit(TestEvent::PhaseChanged {
            phase: Phase::Complete,
        });

        let (summary, run_cleanup) = {
            let mut state = self.state.lock().await;
            let summary = trials::summarize(&state.trials);
            let run_cleanup = !state.is_practice && !state.cleanup_done;
            state.cleanup_done = true;
            (summary, run_cleanup)
        };

        if run_cleanup {
            self.session.lock().await.cleanup().await;
        }
        self.emit(TestEvent::TestCompleted { summary });
    }

    async fn arm_escape(&self) {
        let epoch = {
            let mut state = self.state.lock().await;
            if state.escape_armed {
                return;
            }
            state.escape_armed = true;
            state.escape_epoch += 1;
            state.escape_epoch
        };
        self.emit(TestEvent::EscapeArmed);

        let this = self.clone();
        let task = tokio::spawn(async move {
            sleep(this.config.escape_confirmation()).await;
            let disarmed = {
                let mut state = this.state.lock().await;
                if state.escape_armed && state.escape_epoch == epoch {
                    state.escape_armed = false;
                    true
                } else {
                    false
                }
            };
            if disarmed {
                this.emit(TestEvent::EscapeDisarmed);
            }
        });
        if let Some(old) = self.escape_task.lock().await.replace(task) {
            old.abort();
        }
    }

    async fn disarm_escape(&self) {
        {
            let mut state = self.state.lock().await;
            if !state.escape_armed {
                return;
            }
            state.escape_armed = false;
            state.escape_epoch += 1;
        }
        if let Some(task) = self.escape_task.lock().await.take() {
            task.abort();
        }
        self.emit(TestEvent::EscapeDisarmed);
    }

    /// Confirmed abort: stop every timer, close out calibration, tear down
    /// whatever part of the session came up, and tell the UI to leave.
    pub async fn abort(&self) {
        info!("test aborted by participant");
        self.cancel_tasks().await;
        {
            let mut state = self.state.lock().await;
            state.escape_armed = false;
            state.run_id += 1;
            state.trial_started_at = None;
        }
        self.calibration.lock().await.abort().await;
        self.session.lock().await.abort_teardown().await;
        self.emit(TestEvent::NavigateAway);
    }

    /// Cancels everything the orchestrator spawned. Call when unmounting the
    /// test view.
    pub async fn shutdown(&self) {
        self.cancel_tasks().await;
        if let Some(task) = self.status_forwarder.lock().await.take() {
            task.abort();
        }
    }

    async fn cancel_tasks(&self) {
        for slot in [
            &self.deadline_task,
            &self.advance_task,
            &self.escape_task,
            &self.calibration_pump,
        ] {
            if let Some(task) = slot.lock().await.take() {
                task.abort();
            }
        }
    }

    fn emit(&self, event: TestEvent) {
        let _ = self.events.send(event);
    }
}
