use anyhow::Result;
use log::{info, trace};
use std::io::Write;

use crate::gestures::{Direction, GestureEvent, GestureKind};
use crate::pipeline::TickFrame;

pub trait OutputSink {
    fn on_frame(&mut self, frame: TickFrame) -> Result<()>;
    fn on_gesture(&mut self, ev: &GestureEvent) -> Result<()>;
}

const METER_CELLS: usize = 10;

pub fn position_bar(position: Option<f64>, width: usize) -> String {
    let mut cells = vec!['─'; width];
    if let Some(p) = position {
        let idx = (p * (width - 1) as f64) as usize;
        cells[idx.min(width - 1)] = '●';
    }
    cells.into_iter().collect()
}

pub fn intensity_meter(level: f64, max_level: f64) -> String {
    let filled = ((level / max_level) * METER_CELLS as f64) as usize;
    let filled = filled.min(METER_CELLS);
    format!("{}{}", "█".repeat(filled), "░".repeat(METER_CELLS - filled))
}

fn gesture_label(ev: &GestureEvent) -> String {
    match ev.kind {
        GestureKind::StrokeCycle {
            direction: Direction::Rising,
        } => "Stroke: right!".to_string(),
        GestureKind::StrokeCycle {
            direction: Direction::Falling,
        } => "Stroke: left!".to_string(),
        GestureKind::Tap => "Tap!".to_string(),
        GestureKind::Hold => "Hold...".to_string(),
    }
}

pub struct TerminalSink<W: Write> {
    out: W,
    bar_width: usize,
    max_level: f64,
    label: Option<String>,
    last_line: String,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W, bar_width: usize, max_level: f64) -> Self {
        Self {
            out,
            bar_width,
            max_level,
            label: None,
            last_line: String::new(),
        }
    }

    pub fn header(&mut self) -> Result<()> {
        writeln!(self.out, "\nLinear Softpot Touch Sensor")?;
        writeln!(
            self.out,
            "Left{}Right\n",
            " ".repeat(self.bar_width.saturating_sub(2))
        )?;
        Ok(())
    }

    fn render(&self, frame: &TickFrame) -> String {
        let mut line = format!("[{}]", position_bar(frame.position, self.bar_width));
        if !frame.touching {
            line.push_str(" (no touch)");
        }
        if let Some(label) = &self.label {
            line.push(' ');
            line.push_str(label);
        }
        line.push_str(&format!(
            " Intensity: [{}]",
            intensity_meter(frame.intensity, self.max_level)
        ));
        line
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for TerminalSink<W> {
    fn on_frame(&mut self, frame: TickFrame) -> Result<()> {
        let line = self.render(&frame);
        if line != self.last_line {
            // \x1b[K clears leftovers of a longer previous line
            write!(self.out, "\r{line}\x1b[K")?;
            self.out.flush()?;
            self.last_line = line;
        }
        Ok(())
    }

    fn on_gesture(&mut self, ev: &GestureEvent) -> Result<()> {
        self.label = Some(gesture_label(ev));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn on_frame(&mut self, frame: TickFrame) -> Result<()> {
        trace!(
            "frame t={} pos={:?} intensity={:.3}",
            frame.t_ms, frame.position, frame.intensity
        );
        Ok(())
    }

    fn on_gesture(&mut self, ev: &GestureEvent) -> Result<()> {
        info!(
            "{} magnitude={:.3} duration={}ms at {}ms",
            gesture_label(ev),
            ev.magnitude,
            ev.duration_ms,
            ev.t_ms
        );
        Ok(())
    }
}

// Intensity is reported to this many decimals; finer decay is not a change.
const FRAME_RESOLUTION: f64 = 1000.0;

/// JSON lines for a consumer process: every gesture, plus a `frame` record
/// whenever position, contact or intensity changes.
pub struct JsonLinesSink<W: Write> {
    out: W,
    last_frame: Option<(Option<f64>, bool, f64)>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_frame: None,
        }
    }

    fn write_line(&mut self, v: &impl serde::Serialize) -> Result<()> {
        serde_json::to_writer(&mut self.out, v)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> OutputSink for JsonLinesSink<W> {
    fn on_frame(&mut self, frame: TickFrame) -> Result<()> {
        let intensity = (frame.intensity * FRAME_RESOLUTION).round() / FRAME_RESOLUTION;
        let key = (frame.position, frame.touching, intensity);
        if self.last_frame == Some(key) {
            return Ok(());
        }
        self.last_frame = Some(key);
        self.write_line(&serde_json::json!({
            "kind": "frame",
            "t_ms": frame.t_ms,
            "position": frame.position,
            "touching": frame.touching,
            "intensity": intensity,
        }))
    }

    fn on_gesture(&mut self, ev: &GestureEvent) -> Result<()> {
        self.write_line(ev)
    }
}
