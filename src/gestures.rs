use log::debug;
use serde::Serialize;

use crate::config::GestureThresholds;
use crate::tracker::{TouchUpdate, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Rising,
    Falling,
}

impl Direction {
    fn of(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Rising
        } else {
            Direction::Falling
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GestureKind {
    /// One leg of a back-and-forth stroke; `direction` is the leg just completed.
    StrokeCycle { direction: Direction },
    Tap,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GestureEvent {
    #[serde(flatten)]
    pub kind: GestureKind,
    pub magnitude: f64,
    pub t_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Touching,
    Rising,
    Falling,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrokeState {
    pub direction: Option<Direction>,
    pub anchor: f64,
    /// Where the motion last turned; equals `anchor` after an emitted cycle.
    pub turn: f64,
    pub extreme: f64,
    leg_start_ms: u64,
}

impl StrokeState {
    fn new(t_ms: u64, pos: f64) -> Self {
        Self {
            direction: None,
            anchor: pos,
            turn: pos,
            extreme: pos,
            leg_start_ms: t_ms,
        }
    }

    /// Longer of the span since the anchor and the span since the last turn.
    pub fn distance(&self) -> f64 {
        (self.extreme - self.anchor)
            .abs()
            .max((self.extreme - self.turn).abs())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Contact {
    down_ms: u64,
    last_pos: f64,
    last_motion_ms: u64,
    stroke: StrokeState,
    strokes: u32,
    hold_armed: bool,
    holds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GestureDetector {
    th: GestureThresholds,
    contact: Option<Contact>,
}

impl GestureDetector {
    pub fn new(th: GestureThresholds) -> Self {
        Self { th, contact: None }
    }

    pub fn phase(&self) -> Phase {
        match &self.contact {
            None => Phase::Idle,
            Some(c) => match c.stroke.direction {
                None => Phase::Touching,
                Some(Direction::Rising) => Phase::Rising,
                Some(Direction::Falling) => Phase::Falling,
            },
        }
    }

    pub fn stroke(&self) -> Option<&StrokeState> {
        self.contact.as_ref().map(|c| &c.stroke)
    }

    pub fn update(&mut self, u: &TouchUpdate) -> Option<GestureEvent> {
        match u.transition {
            Some(Transition::Down) => {
                if let Some(p) = u.position {
                    self.contact = Some(Contact {
                        down_ms: u.t_ms,
                        last_pos: p,
                        last_motion_ms: u.t_ms,
                        stroke: StrokeState::new(u.t_ms, p),
                        strokes: 0,
                        hold_armed: true,
                        holds: 0,
                    });
                }
                return None;
            }
            Some(Transition::Up) => return self.release(u.t_ms, u.last_contact_ms),
            None => {}
        }

        let th = &self.th;
        let (Some(c), Some(p)) = (self.contact.as_mut(), u.position) else {
            return None;
        };
        let t = u.t_ms;
        let delta = p - c.last_pos;
        c.last_pos = p;

        if delta == 0.0 || delta.abs() < th.min_motion {
            let still_ms = t.saturating_sub(c.last_motion_ms);
            if c.hold_armed && still_ms >= th.hold_ms {
                c.hold_armed = false;
                c.holds += 1;
                debug!("hold at {p:.3} after {still_ms} ms");
                return Some(GestureEvent {
                    kind: GestureKind::Hold,
                    magnitude: 1.0,
                    t_ms: t,
                    duration_ms: still_ms,
                });
            }
            return None;
        }

        c.last_motion_ms = t;
        c.hold_armed = true;
        let dir = Direction::of(delta);
        let st = &mut c.stroke;

        match st.direction {
            None => {
                st.direction = Some(dir);
                st.extreme = p;
                None
            }
            Some(cur) if cur == dir => {
                st.extreme = match cur {
                    Direction::Rising => st.extreme.max(p),
                    Direction::Falling => st.extreme.min(p),
                };
                None
            }
            Some(cur) => {
                let dist = st.distance();
                let turn = st.extreme;
                st.direction = Some(dir);
                st.extreme = p;
                if dist < th.min_stroke_distance {
                    // too short to count: follow the motion, keep the anchor
                    st.turn = turn;
                    return None;
                }
                let ev = GestureEvent {
                    kind: GestureKind::StrokeCycle { direction: cur },
                    magnitude: dist,
                    t_ms: t,
                    duration_ms: t.saturating_sub(st.leg_start_ms),
                };
                st.anchor = turn;
                st.turn = turn;
                st.leg_start_ms = t;
                c.strokes += 1;
                debug!("stroke {cur:?} {dist:.3} (reversal at {turn:.3})");
                Some(ev)
            }
        }
    }

    // Durations end at the last contact sample, not at the debounced release.
    fn release(&mut self, t: u64, last_contact_ms: u64) -> Option<GestureEvent> {
        let c = self.contact.take()?;
        let st = &c.stroke;
        if let Some(direction) = st.direction {
            let dist = st.distance();
            if dist >= self.th.min_stroke_distance {
                debug!("stroke {direction:?} {dist:.3} (lift-off)");
                return Some(GestureEvent {
                    kind: GestureKind::StrokeCycle { direction },
                    magnitude: dist,
                    t_ms: t,
                    duration_ms: last_contact_ms.saturating_sub(st.leg_start_ms),
                });
            }
        }

        let held_ms = last_contact_ms.saturating_sub(c.down_ms);
        if c.strokes == 0 && c.holds == 0 && held_ms <= self.th.tap_ms {
            debug!("tap after {held_ms} ms");
            return Some(GestureEvent {
                kind: GestureKind::Tap,
                magnitude: 1.0,
                t_ms: t,
                duration_ms: held_ms,
            });
        }
        None
    }
}
