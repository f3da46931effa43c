use serde::Serialize;

use crate::config::IntensityParams;
use crate::gestures::{GestureEvent, GestureKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IntensityState {
    pub level: f64,
    pub last_update_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntensityTracker {
    params: IntensityParams,
    state: IntensityState,
}

impl IntensityTracker {
    pub fn new(params: IntensityParams, start_ms: u64) -> Self {
        Self {
            params,
            state: IntensityState {
                level: 0.0,
                last_update_ms: start_ms,
            },
        }
    }

    pub fn level(&self) -> f64 {
        self.state.level
    }

    pub fn state(&self) -> IntensityState {
        self.state
    }

    pub fn increment(&self, ev: &GestureEvent) -> f64 {
        let p = &self.params;
        match ev.kind {
            GestureKind::StrokeCycle { .. } => {
                let mut gain = p.stroke_gain * ev.magnitude;
                if p.speed_damping > 0.0 && ev.duration_ms > 0 {
                    let speed = ev.magnitude / (ev.duration_ms as f64 / 1000.0);
                    gain /= 1.0 + speed / p.speed_damping;
                }
                gain.min(p.stroke_cap)
            }
            GestureKind::Tap => p.tap_gain,
            GestureKind::Hold => p.hold_gain,
        }
    }

    pub fn on_event(&mut self, ev: &GestureEvent) {
        let bumped = self.state.level + self.increment(ev);
        self.state.level = bumped.clamp(0.0, self.params.max_level);
    }

    /// `level *= exp(-decay_rate * dt)`; a clock that goes backwards counts as no time.
    pub fn tick(&mut self, now_ms: u64) {
        let dt = now_ms.saturating_sub(self.state.last_update_ms) as f64 / 1000.0;
        let decayed = self.state.level * (-self.params.decay_rate * dt).exp();
        self.state.level = decayed.clamp(0.0, self.params.max_level);
        self.state.last_update_ms = self.state.last_update_ms.max(now_ms);
    }
}
