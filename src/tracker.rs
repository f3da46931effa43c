//! Touch presence with hysteresis and EMA smoothing.

use serde::Serialize;

use crate::config::TouchThresholds;
use crate::sampler::Sample;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchState {
    #[default]
    Idle,
    Touching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchUpdate {
    pub t_ms: u64,
    pub state: TouchState,
    pub transition: Option<Transition>,
    pub position: Option<f64>,
    /// Time of the latest sample that saw contact.
    pub last_contact_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TouchTracker {
    th: TouchThresholds,
    state: TouchState,
    present_run: u32,
    missing_run: u32,
    smoothed: Option<f64>,
    last_contact_ms: u64,
}

impl TouchTracker {
    pub fn new(th: TouchThresholds) -> Self {
        Self {
            th,
            state: TouchState::Idle,
            present_run: 0,
            missing_run: 0,
            smoothed: None,
            last_contact_ms: 0,
        }
    }

    pub fn state(&self) -> TouchState {
        self.state
    }

    pub fn position(&self) -> Option<f64> {
        self.smoothed
    }

    pub fn update(&mut self, sample: &Sample) -> TouchUpdate {
        let mut transition = None;
        if sample.position.is_some() {
            self.last_contact_ms = sample.t_ms;
        }
        match (self.state, sample.position) {
            (TouchState::Idle, Some(p)) => {
                self.present_run += 1;
                if self.present_run >= self.th.enter_samples {
                    self.state = TouchState::Touching;
                    self.missing_run = 0;
                    self.smoothed = Some(p);
                    transition = Some(Transition::Down);
                }
            }
            (TouchState::Idle, None) => {
                self.present_run = 0;
            }
            (TouchState::Touching, Some(p)) => {
                self.missing_run = 0;
                let a = self.th.smooth_ema;
                self.smoothed = Some(match self.smoothed {
                    Some(prev) => a * p + (1.0 - a) * prev,
                    None => p,
                });
            }
            (TouchState::Touching, None) => {
                // short dropouts keep the last smoothed position
                self.missing_run += 1;
                if self.missing_run >= self.th.exit_samples {
                    self.state = TouchState::Idle;
                    self.present_run = 0;
                    self.smoothed = None;
                    transition = Some(Transition::Up);
                }
            }
        }

        TouchUpdate {
            t_ms: sample.t_ms,
            state: self.state,
            transition,
            position: self.smoothed,
            last_contact_ms: self.last_contact_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn th(enter: u32, exit: u32, ema: f64) -> TouchThresholds {
        TouchThresholds {
            enter_samples: enter,
            exit_samples: exit,
            smooth_ema: ema,
        }
    }

    fn s(t_ms: u64, position: Option<f64>) -> Sample {
        Sample {
            t_ms,
            raw: 0,
            position,
        }
    }

    fn transitions(tr: &mut TouchTracker, seq: &[Option<f64>]) -> Vec<Transition> {
        seq.iter()
            .enumerate()
            .filter_map(|(i, p)| tr.update(&s(i as u64 * 10, *p)).transition)
            .collect()
    }

    #[test]
    fn single_dropout_does_not_release() {
        let mut tr = TouchTracker::new(th(1, 2, 1.0));
        let seq = [Some(0.5), Some(0.5), None, Some(0.5), Some(0.5)];
        assert_eq!(transitions(&mut tr, &seq), vec![Transition::Down]);
        assert_eq!(tr.state(), TouchState::Touching);
    }

    #[test]
    fn dropout_holds_last_position() {
        let mut tr = TouchTracker::new(th(1, 3, 1.0));
        tr.update(&s(0, Some(0.4)));
        let u = tr.update(&s(10, None));
        assert_eq!(u.state, TouchState::Touching);
        assert_eq!(u.position, Some(0.4));
        assert_eq!(u.transition, None);
    }

    #[test]
    fn transitions_fire_once_per_change() {
        let mut tr = TouchTracker::new(th(1, 2, 1.0));
        let seq = [
            None,
            Some(0.2),
            Some(0.3),
            Some(0.4),
            None,
            None,
            None,
            None,
            Some(0.6),
            None,
            None,
        ];
        assert_eq!(
            transitions(&mut tr, &seq),
            vec![
                Transition::Down,
                Transition::Up,
                Transition::Down,
                Transition::Up
            ]
        );
        assert_eq!(tr.position(), None);
    }

    #[test]
    fn enter_requires_consecutive_contact() {
        let mut tr = TouchTracker::new(th(3, 1, 1.0));
        let seq = [Some(0.5), Some(0.5), None, Some(0.5), Some(0.5)];
        assert!(transitions(&mut tr, &seq).is_empty());
        assert_eq!(tr.update(&s(100, Some(0.5))).transition, Some(Transition::Down));
    }

    #[test]
    fn release_reports_last_contact_time() {
        let mut tr = TouchTracker::new(th(1, 2, 1.0));
        tr.update(&s(0, Some(0.5)));
        tr.update(&s(20, Some(0.5)));
        tr.update(&s(40, None));
        let u = tr.update(&s(60, None));
        assert_eq!(u.transition, Some(Transition::Up));
        assert_eq!(u.last_contact_ms, 20);
    }

    #[test]
    fn ema_damps_single_sample_spikes() {
        let mut tr = TouchTracker::new(th(1, 2, 0.25));
        tr.update(&s(0, Some(0.5)));
        let spiked = tr.update(&s(10, Some(0.9))).position.unwrap();
        assert!((spiked - 0.6).abs() < 1e-9);
        let settled = tr.update(&s(20, Some(0.5))).position.unwrap();
        assert!((settled - 0.575).abs() < 1e-9);
    }

    #[test]
    fn smoothing_restarts_on_new_contact() {
        let mut tr = TouchTracker::new(th(1, 1, 0.1));
        tr.update(&s(0, Some(0.1)));
        tr.update(&s(10, None));
        let u = tr.update(&s(20, Some(0.9)));
        assert_eq!(u.transition, Some(Transition::Down));
        assert_eq!(u.position, Some(0.9));
    }
}
