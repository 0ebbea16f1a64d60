//! Go/No-Go trial batches: generation, outcome scoring, summary.
//!
//! A batch is generated once per phase with a fixed Go:No-Go ratio and a
//! Fisher-Yates shuffle. Each trial's outcome is written exactly once, by
//! whichever of {keypress, display timeout} fires first; the loser of that
//! race must observe a non-pending outcome and back off.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Uppercase alphabet minus the No-Go letter.
const GO_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWYZ";

pub const NOGO_STIMULUS: char = 'X';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrialKind {
    Go,
    NoGo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrialOutcome {
    Pending,
    Correct,
    TooSlow,
    FalseAlarm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: usize,
    pub kind: TrialKind,
    pub stimulus: char,
    pub outcome: TrialOutcome,
    pub response_time_ms: Option<u64>,
}

impl Trial {
    /// Scores a keypress. A press on a Go trial is Correct within the limit
    /// and TooSlow past it; any press on a No-Go trial is a FalseAlarm.
    /// No-op once the outcome is terminal.
    pub fn respond(&mut self, response_time_ms: u64, limit_ms: u64) -> TrialOutcome {
        if self.outcome != TrialOutcome::Pending {
            return self.outcome;
        }
        self.outcome = match self.kind {
            TrialKind::Go if response_time_ms <= limit_ms => TrialOutcome::Correct,
            TrialKind::Go => TrialOutcome::TooSlow,
            TrialKind::NoGo => TrialOutcome::FalseAlarm,
        };
        self.response_time_ms = Some(response_time_ms);
        self.outcome
    }

    /// Scores a display timeout: a withheld No-Go is Correct, an unanswered
    /// Go is TooSlow. No-op once the outcome is terminal.
    pub fn expire(&mut self) -> TrialOutcome {
        if self.outcome != TrialOutcome::Pending {
            return self.outcome;
        }
        self.outcome = match self.kind {
            TrialKind::Go => TrialOutcome::TooSlow,
            TrialKind::NoGo => TrialOutcome::Correct,
        };
        self.outcome
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome != TrialOutcome::Pending
    }
}

/// Accuracy summary over a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub correct: usize,
    pub accuracy_pct: f64,
}

pub fn summarize(trials: &[Trial]) -> BatchSummary {
    let correct = trials
        .iter()
        .filter(|trial| trial.outcome == TrialOutcome::Correct)
        .count();
    let accuracy_pct = if trials.is_empty() {
        0.0
    } else {
        correct as f64 / trials.len() as f64 * 100.0
    };
    BatchSummary {
        total: trials.len(),
        correct,
        accuracy_pct,
    }
}

/// Builds a fresh shuffled batch: `floor(count * go_ratio)` Go trials with
/// random non-X letters, the remainder No-Go trials showing `X`.
pub fn generate_batch(count: usize, go_ratio: f64) -> Vec<Trial> {
    generate_batch_with(&mut rand::thread_rng(), count, go_ratio)
}

pub fn generate_batch_with<R: Rng>(rng: &mut R, count: usize, go_ratio: f64) -> Vec<Trial> {
    let go_count = (count as f64 * go_ratio).floor() as usize;
    let mut trials = Vec::with_capacity(count);

    for id in 0..go_count {
        trials.push(Trial {
            id,
            kind: TrialKind::Go,
            stimulus: random_go_letter(rng),
            outcome: TrialOutcome::Pending,
            response_time_ms: None,
        });
    }
    for id in go_count..count {
        trials.push(Trial {
            id,
            kind: TrialKind::NoGo,
            stimulus: NOGO_STIMULUS,
            outcome: TrialOutcome::Pending,
            response_time_ms: None,
        });
    }

    trials.shuffle(rng);
    trials
}

pub fn random_go_letter<R: Rng>(rng: &mut R) -> char {
    GO_LETTERS[rng.gen_range(0..GO_LETTERS.len())] as char
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn batch_holds_the_fixed_ratio_for_any_count() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in [1, 2, 5, 10, 37, 100] {
            let batch = generate_batch_with(&mut rng, count, 0.8);
            let go = batch.iter().filter(|t| t.kind == TrialKind::Go).count();
            let nogo = batch.iter().filter(|t| t.kind == TrialKind::NoGo).count();
            assert_eq!(go, (count as f64 * 0.8).floor() as usize, "count={count}");
            assert_eq!(go + nogo, count);
        }
    }

    #[test]
    fn stimuli_follow_the_alphabet_rules() {
        let mut rng = StdRng::seed_from_u64(11);
        let batch = generate_batch_with(&mut rng, 100, 0.8);
        for trial in &batch {
            match trial.kind {
                TrialKind::NoGo => assert_eq!(trial.stimulus, 'X'),
                TrialKind::Go => {
                    assert!(trial.stimulus.is_ascii_uppercase());
                    assert_ne!(trial.stimulus, 'X');
                }
            }
        }
    }

    #[test]
    fn generations_never_alias() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = generate_batch_with(&mut rng, 10, 0.8);
        let mut b = generate_batch_with(&mut rng, 10, 0.8);
        b[0].outcome = TrialOutcome::Correct;
        assert_eq!(a[0].outcome, TrialOutcome::Pending);
    }

    fn go_trial() -> Trial {
        Trial {
            id: 0,
            kind: TrialKind::Go,
            stimulus: 'K',
            outcome: TrialOutcome::Pending,
            response_time_ms: None,
        }
    }

    fn nogo_trial() -> Trial {
        Trial {
            id: 1,
            kind: TrialKind::NoGo,
            stimulus: 'X',
            outcome: TrialOutcome::Pending,
            response_time_ms: None,
        }
    }

    #[test]
    fn go_response_at_the_limit_boundary() {
        let mut fast = go_trial();
        assert_eq!(fast.respond(1999, 2000), TrialOutcome::Correct);

        let mut slow = go_trial();
        assert_eq!(slow.respond(2001, 2000), TrialOutcome::TooSlow);
        assert_eq!(slow.response_time_ms, Some(2001));
    }

    #[test]
    fn nogo_press_is_a_false_alarm_and_timeout_is_correct() {
        let mut pressed = nogo_trial();
        assert_eq!(pressed.respond(300, 2000), TrialOutcome::FalseAlarm);

        let mut withheld = nogo_trial();
        assert_eq!(withheld.expire(), TrialOutcome::Correct);
        assert_eq!(withheld.response_time_ms, None);
    }

    #[test]
    fn outcome_is_written_once_and_never_reverts() {
        let mut trial = go_trial();
        assert_eq!(trial.respond(100, 2000), TrialOutcome::Correct);
        // The losing timer must observe the terminal value and back off.
        assert_eq!(trial.expire(), TrialOutcome::Correct);
        assert_eq!(trial.respond(5000, 2000), TrialOutcome::Correct);
        assert_eq!(trial.response_time_ms, Some(100));
    }

    #[test]
    fn all_correct_practice_batch_scores_100_percent() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut batch = generate_batch_with(&mut rng, 10, 0.8);
        for trial in batch.iter_mut() {
            match trial.kind {
                TrialKind::Go => {
                    trial.respond(400, 2000);
                }
                TrialKind::NoGo => {
                    trial.expire();
                }
            }
        }
        let summary = summarize(&batch);
        assert_eq!(summary.correct, 10);
        assert_eq!(summary.total, 10);
        assert_eq!(summary.accuracy_pct, 100.0);
    }
}
