//! Eight-point gaze calibration against the local agent.
//!
//! Points are captured strictly one at a time, in the fixed clockwise order,
//! with a full dwell delay after each acknowledgment. A failed point halts
//! the sequence; the participant restarts from the UI rather than the
//! controller retrying on its own.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{AgentApi, CalibrationPointRequest};

/// Screen-relative dot positions in percent, clockwise from top-left.
pub const CALIBRATION_POINTS: [CalibrationPoint; 8] = [
    CalibrationPoint { x: 10.0, y: 10.0 },
    CalibrationPoint { x: 50.0, y: 10.0 },
    CalibrationPoint { x: 90.0, y: 10.0 },
    CalibrationPoint { x: 90.0, y: 50.0 },
    CalibrationPoint { x: 90.0, y: 90.0 },
    CalibrationPoint { x: 50.0, y: 90.0 },
    CalibrationPoint { x: 10.0, y: 90.0 },
    CalibrationPoint { x: 10.0, y: 50.0 },
];

/// Step index once every dot has been captured and finish is acknowledged.
pub const CALIBRATION_DONE_STEP: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationUpdate {
    /// Dot `step` (1..=8) is on screen and being captured.
    DotShown(u8),
    /// All dots captured and `/calibrate/finish` acknowledged.
    Finished,
    /// Capture halted at `step`; no further dots will be posted.
    Failed { step: u8, message: String },
}

pub struct CalibrationController {
    agent: Arc<dyn AgentApi>,
    point_dwell: Duration,
    samples: u32,
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl CalibrationController {
    pub fn new(agent: Arc<dyn AgentApi>, point_dwell: Duration, samples: u32) -> Self {
        Self {
            agent,
            point_dwell,
            samples,
            task: None,
            cancel: None,
        }
    }

    /// Puts the agent into calibration mode. The caller surfaces the error
    /// to the participant; there is no automatic retry.
    pub async fn start(&self) -> Result<()> {
        self.agent
            .calibrate_start()
            .await
            .context("starting calibration")
    }

    /// Kicks off the point-by-point capture. Updates arrive on the returned
    /// channel; the sequence needs no further input until it finishes or
    /// fails. Any previous sequence is cancelled first.
    pub fn begin_sequence(&mut self, session_uid: String) -> mpsc::UnboundedReceiver<CalibrationUpdate> {
        self.cancel_task();

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let agent = Arc::clone(&self.agent);
        let dwell = self.point_dwell;
        let samples = self.samples;

        let handle = tokio::spawn(async move {
            run_sequence(agent, session_uid, dwell, samples, updates_tx, token).await;
        });

        self.task = Some(handle);
        self.cancel = Some(cancel);
        updates_rx
    }

    /// Cancels any in-flight sequence and tells the agent to close out
    /// calibration so it is not left half-calibrated. Finish errors are
    /// ignored here; this runs on the abort path.
    pub async fn abort(&mut self) {
        self.cancel_task();
        if let Err(err) = self.agent.calibrate_finish().await {
            warn!("calibrate finish during abort failed: {err:#}");
        }
    }

    fn cancel_task(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

async fn run_sequence(
    agent: Arc<dyn AgentApi>,
    session_uid: String,
    dwell: Duration,
    samples: u32,
    updates: mpsc::UnboundedSender<CalibrationUpdate>,
    cancel: CancellationToken,
) {
    for step in 1..=CALIBRATION_POINTS.len() as u8 {
        if cancel.is_cancelled() {
            return;
        }
        let _ = updates.send(CalibrationUpdate::DotShown(step));

        let point = CALIBRATION_POINTS[step as usize - 1];
        let request = CalibrationPointRequest {
            session_uid: session_uid.clone(),
            x: point.x,
            y: point.y,
            duration: dwell.as_secs_f64(),
            samples,
        };

        if let Err(err) = agent.calibrate_point(&request).await {
            error!("calibration point {step} failed: {err:#}");
            let _ = updates.send(CalibrationUpdate::Failed {
                step,
                message: "Calibration failed. Please try again.".into(),
            });
            return;
        }

        if step == CALIBRATION_POINTS.len() as u8 {
            if let Err(err) = agent.calibrate_finish().await {
                error!("calibration finish failed: {err:#}");
                let _ = updates.send(CalibrationUpdate::Failed {
                    step,
                    message: "Calibration failed. Please try again.".into(),
                });
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(dwell) => {}
            _ = cancel.cancelled() => return,
        }
    }

    let _ = updates.send(CalibrationUpdate::Finished);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingAgent;

    fn controller(agent: &Arc<RecordingAgent>) -> CalibrationController {
        let api: Arc<dyn AgentApi> = Arc::clone(agent) as Arc<dyn AgentApi>;
        CalibrationController::new(api, Duration::from_millis(1), 30)
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<CalibrationUpdate>) -> Vec<CalibrationUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test]
    async fn captures_all_points_in_clockwise_order_then_finishes() {
        let agent = Arc::new(RecordingAgent::new());
        let mut controller = controller(&agent);

        let updates = drain(controller.begin_sequence("uid-1".into())).await;

        assert_eq!(updates.len(), 9);
        for (index, update) in updates.iter().take(8).enumerate() {
            assert_eq!(*update, CalibrationUpdate::DotShown(index as u8 + 1));
        }
        assert_eq!(updates[8], CalibrationUpdate::Finished);

        let calls = agent.calls();
        assert_eq!(calls.len(), 9);
        assert_eq!(calls[0], "calibrate_point 10,10");
        assert_eq!(calls[1], "calibrate_point 50,10");
        assert_eq!(calls[7], "calibrate_point 10,50");
        assert_eq!(calls[8], "calibrate_finish");
    }

    #[tokio::test]
    async fn point_failure_halts_without_advancing_or_finishing() {
        let agent = Arc::new(RecordingAgent::new());
        let mut controller = controller(&agent);

        agent.fail_on_nth("calibrate_point", 3);
        let updates = drain(controller.begin_sequence("uid-1".into())).await;

        assert_eq!(
            updates,
            vec![
                CalibrationUpdate::DotShown(1),
                CalibrationUpdate::DotShown(2),
                CalibrationUpdate::DotShown(3),
                CalibrationUpdate::Failed {
                    step: 3,
                    message: "Calibration failed. Please try again.".into()
                },
            ]
        );
        let calls = agent.calls();
        assert_eq!(calls.len(), 3);
        assert!(!calls.contains(&"calibrate_finish".to_string()));
    }

    #[tokio::test]
    async fn abort_tells_the_agent_to_finish_anyway() {
        let agent = Arc::new(RecordingAgent::new());
        let mut controller = controller(&agent);

        let _rx = controller.begin_sequence("uid-1".into());
        controller.abort().await;

        assert!(agent.calls().contains(&"calibrate_finish".to_string()));
    }

    #[tokio::test]
    async fn abort_swallows_finish_errors() {
        let agent = Arc::new(RecordingAgent::new());
        agent.fail_on("calibrate_finish");
        let mut controller = controller(&agent);

        controller.abort().await;
    }
}
