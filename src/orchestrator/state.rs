//! Phase vocabulary and the pure keyboard dispatch table.
//!
//! Keyboard handling is a function of `(phase, calibration step, escape
//! armed, agent connected, key)` returning an action for the controller to
//! execute. Keeping it pure keeps the interrupt semantics testable without
//! timers or HTTP.

use std::time::Instant;

use serde::Serialize;

use crate::trials::Trial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Instructions,
    Calibration,
    Practice,
    MainTest,
    PracticeComplete,
    Complete,
}

impl Phase {
    pub fn is_trial_phase(&self) -> bool {
        matches!(self, Phase::Practice | Phase::MainTest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Space,
    Escape,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Ignore,
    /// First Escape press: show the abort confirmation.
    ArmEscape,
    /// Escape while armed: abort the whole flow.
    ConfirmAbort,
    /// Enter while armed: resume the current phase unchanged.
    DisarmEscape,
    BeginCalibration,
    /// Enter on the instructions screen with no agent: offer the install flow.
    PromptInstall,
    /// Space/Enter on the calibration intro: launch the dot sequence.
    BeginPointSequence,
    BeginMainTest,
    RespondToTrial,
}

pub fn dispatch_key(
    phase: Phase,
    calibration_step: u8,
    escape_armed: bool,
    agent_connected: bool,
    key: Key,
) -> KeyAction {
    // Escape outranks everything, in every phase.
    if key == Key::Escape {
        return if escape_armed {
            KeyAction::ConfirmAbort
        } else {
            KeyAction::ArmEscape
        };
    }
    // While armed, Enter resumes and all other keys are swallowed.
    if escape_armed {
        return if key == Key::Enter {
            KeyAction::DisarmEscape
        } else {
            KeyAction::Ignore
        };
    }

    match (phase, key) {
        (Phase::Instructions, Key::Enter) if agent_connected => KeyAction::BeginCalibration,
        (Phase::Instructions, Key::Enter) => KeyAction::PromptInstall,
        (Phase::Calibration, Key::Enter | Key::Space) if calibration_step == 0 => {
            KeyAction::BeginPointSequence
        }
        (Phase::PracticeComplete, Key::Enter) => KeyAction::BeginMainTest,
        (Phase::Practice | Phase::MainTest, Key::Space) => KeyAction::RespondToTrial,
        _ => KeyAction::Ignore,
    }
}

/// Mutable run state behind the orchestrator's lock.
pub(crate) struct TestState {
    pub phase: Phase,
    pub calibration_step: u8,
    pub calibration_error: Option<String>,
    pub trials: Vec<Trial>,
    pub trial_index: usize,
    /// Set when the current stimulus went up; cleared on advance.
    pub trial_started_at: Option<Instant>,
    /// One finalize per trial: set by whichever of keypress/timeout wins.
    pub response_handled: bool,
    pub is_practice: bool,
    pub escape_armed: bool,
    /// Bumped on every arm/disarm so a stale auto-disarm timer is a no-op.
    pub escape_epoch: u64,
    /// Bumped on every batch start and abort; timers carry the id they were
    /// scheduled under and must not touch a newer run.
    pub run_id: u64,
    pub starting_main_test: bool,
    pub cleanup_done: bool,
}

impl TestState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Instructions,
            calibration_step: 0,
            calibration_error: None,
            trials: Vec::new(),
            trial_index: 0,
            trial_started_at: None,
            response_handled: false,
            is_practice: false,
            escape_armed: false,
            escape_epoch: 0,
            run_id: 0,
            starting_main_test: false,
            cleanup_done: false,
        }
    }

    pub fn current_trial(&self) -> Option<&Trial> {
        self.trials.get(self.trial_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_arms_then_confirms_in_any_phase() {
        for phase in [
            Phase::Instructions,
            Phase::Calibration,
            Phase::Practice,
            Phase::MainTest,
            Phase::PracticeComplete,
            Phase::Complete,
        ] {
            assert_eq!(
                dispatch_key(phase, 0, false, true, Key::Escape),
                KeyAction::ArmEscape
            );
            assert_eq!(
                dispatch_key(phase, 0, true, true, Key::Escape),
                KeyAction::ConfirmAbort
            );
        }
    }

    #[test]
    fn enter_while_armed_resumes_and_other_keys_are_swallowed() {
        assert_eq!(
            dispatch_key(Phase::Practice, 0, true, true, Key::Enter),
            KeyAction::DisarmEscape
        );
        assert_eq!(
            dispatch_key(Phase::Practice, 0, true, true, Key::Space),
            KeyAction::Ignore
        );
        assert_eq!(
            dispatch_key(Phase::Instructions, 0, true, true, Key::Other),
            KeyAction::Ignore
        );
    }

    #[test]
    fn instructions_enter_depends_on_the_agent() {
        assert_eq!(
            dispatch_key(Phase::Instructions, 0, false, true, Key::Enter),
            KeyAction::BeginCalibration
        );
        assert_eq!(
            dispatch_key(Phase::Instructions, 0, false, false, Key::Enter),
            KeyAction::PromptInstall
        );
    }

    #[test]
    fn calibration_intro_accepts_space_or_enter_only_at_step_zero() {
        assert_eq!(
            dispatch_key(Phase::Calibration, 0, false, true, Key::Space),
            KeyAction::BeginPointSequence
        );
        assert_eq!(
            dispatch_key(Phase::Calibration, 0, false, true, Key::Enter),
            KeyAction::BeginPointSequence
        );
        for step in 1..=9 {
            assert_eq!(
                dispatch_key(Phase::Calibration, step, false, true, Key::Space),
                KeyAction::Ignore
            );
        }
    }

    #[test]
    fn practice_complete_enter_starts_the_main_test() {
        assert_eq!(
            dispatch_key(Phase::PracticeComplete, 9, false, true, Key::Enter),
            KeyAction::BeginMainTest
        );
    }

    #[test]
    fn space_responds_only_during_trial_phases() {
        assert_eq!(
            dispatch_key(Phase::Practice, 9, false, true, Key::Space),
            KeyAction::RespondToTrial
        );
        assert_eq!(
            dispatch_key(Phase::MainTest, 9, false, true, Key::Space),
            KeyAction::RespondToTrial
        );
        assert_eq!(
            dispatch_key(Phase::Complete, 9, false, true, Key::Space),
            KeyAction::Ignore
        );
    }
}
