use log::{debug, info, trace, warn};
use serde::Serialize;
use std::{thread, time::Duration};

use crate::adc::AdcDriver;
use crate::config::Profile;
use crate::error::SensorError;
use crate::gestures::{GestureDetector, GestureEvent, GestureKind, Phase};
use crate::intensity::IntensityTracker;
use crate::sampler::{Sample, Sampler};
use crate::tracker::{TouchState, TouchTracker};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickFrame {
    pub t_ms: u64,
    pub position: Option<f64>,
    pub intensity: f64,
    pub touching: bool,
}

#[derive(Debug)]
pub enum TickOutcome {
    Sampled {
        frame: TickFrame,
        events: Vec<GestureEvent>,
    },
    Skipped(SensorError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counters {
    pub ticks: u64,
    pub skipped: u64,
    pub strokes: u64,
    pub taps: u64,
    pub holds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub touch: TouchState,
    pub phase: Phase,
    pub position: Option<f64>,
    pub stroke_distance: Option<f64>,
    pub intensity: f64,
    pub counters: Counters,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    retries: u32,
    backoff: Duration,
}

// Persistent failures are re-reported at this interval (in ticks).
const WARN_EVERY: u64 = 100;

pub struct Pipeline<D> {
    sampler: Sampler<D>,
    touch: TouchTracker,
    gestures: GestureDetector,
    intensity: IntensityTracker,
    retry: RetryPolicy,
    counters: Counters,
    failing_for: u64,
}

impl<D: AdcDriver> Pipeline<D> {
    pub fn new(driver: D, profile: &Profile, start_ms: u64) -> Self {
        Self {
            sampler: Sampler::new(
                driver,
                profile.sensor.channel,
                profile.calibration.clone(),
            ),
            touch: TouchTracker::new(profile.touch.clone()),
            gestures: GestureDetector::new(profile.gesture.clone()),
            intensity: IntensityTracker::new(profile.intensity.clone(), start_ms),
            retry: RetryPolicy {
                retries: profile.sensor.retries,
                backoff: Duration::from_millis(profile.sensor.retry_backoff_ms),
            },
            counters: Counters::default(),
            failing_for: 0,
        }
    }

    pub fn sampler(&self) -> &Sampler<D> {
        &self.sampler
    }

    pub fn tick(&mut self, t_ms: u64) -> TickOutcome {
        let sample = match self.sample_with_retry(t_ms) {
            Ok(s) => s,
            Err(e) => {
                self.counters.skipped += 1;
                self.failing_for += 1;
                if self.failing_for == 1 || self.failing_for % WARN_EVERY == 0 {
                    warn!(
                        "tick skipped ({} in a row), channel {}: {e}",
                        self.failing_for,
                        e.channel()
                    );
                }
                return TickOutcome::Skipped(e);
            }
        };
        if self.failing_for > 0 {
            info!("sensor recovered after {} skipped ticks", self.failing_for);
            self.failing_for = 0;
        }
        self.counters.ticks += 1;

        let update = self.touch.update(&sample);
        if let Some(tr) = update.transition {
            debug!("touch {tr:?} at {} ms", t_ms);
        }

        let mut events = Vec::new();
        if let Some(ev) = self.gestures.update(&update) {
            match ev.kind {
                GestureKind::StrokeCycle { .. } => self.counters.strokes += 1,
                GestureKind::Tap => self.counters.taps += 1,
                GestureKind::Hold => self.counters.holds += 1,
            }
            events.push(ev);
        }

        self.intensity.tick(t_ms);
        for ev in &events {
            self.intensity.on_event(ev);
        }

        let frame = TickFrame {
            t_ms,
            position: update.position,
            intensity: self.intensity.level(),
            touching: update.state == TouchState::Touching,
        };
        trace!("raw={} contact={} frame={frame:?}", sample.raw, sample.is_touch());
        TickOutcome::Sampled { frame, events }
    }

    fn sample_with_retry(&mut self, t_ms: u64) -> Result<Sample, SensorError> {
        let mut attempt = 0;
        loop {
            match self.sampler.poll(t_ms) {
                Ok(s) => return Ok(s),
                Err(e) if attempt < self.retry.retries => {
                    attempt += 1;
                    debug!("read failed (attempt {attempt}): {e}");
                    if !self.retry.backoff.is_zero() {
                        thread::sleep(self.retry.backoff * attempt);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn status(&self) -> Status {
        Status {
            touch: self.touch.state(),
            phase: self.gestures.phase(),
            position: self.touch.position(),
            stroke_distance: self.gestures.stroke().map(|st| st.distance()),
            intensity: self.intensity.level(),
            counters: self.counters.clone(),
        }
    }
}
