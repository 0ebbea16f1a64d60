//! Events the orchestrator emits for the UI layer to render. The UI is an
//! external collaborator: it feeds key events in and draws whatever these
//! say, nothing more.

use serde::Serialize;

use crate::monitor::AgentConnectionState;
use crate::orchestrator::Phase;
use crate::trials::{BatchSummary, TrialOutcome};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TestEvent {
    PhaseChanged {
        phase: Phase,
    },
    AgentStatusChanged {
        state: AgentConnectionState,
    },
    /// A calibration dot index (1-8), or 9 once calibration is done.
    CalibrationStepChanged {
        step: u8,
    },
    CalibrationFailed {
        step: u8,
        message: String,
    },
    TrialStarted {
        index: usize,
        total: usize,
        stimulus: char,
    },
    /// Practice only: transient outcome feedback.
    FeedbackShown {
        outcome: TrialOutcome,
    },
    FeedbackCleared,
    EscapeArmed,
    EscapeDisarmed,
    /// Enter was pressed with no agent running; offer the download flow.
    InstallPromptRequested,
    MainTestStartFailed {
        message: String,
    },
    TestCompleted {
        summary: BatchSummary,
    },
    /// The participant confirmed the abort; leave the test UI.
    NavigateAway,
}
