use anyhow::Result;
use log::{debug, info};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::adc::{AdcDriver, ReplayAdc};
use crate::config::Profile;
use crate::pipeline::{Counters, Pipeline, TickOutcome};
use crate::sink::OutputSink;

pub struct Ticker {
    period: Duration,
    start: Instant,
    next: Instant,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let now = Instant::now();
        Self {
            period,
            start: now,
            next: now + period,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Sleeps to the next deadline. A loop that fell a whole period behind
    /// re-anchors instead of bursting to catch up.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            let late = now - self.next;
            if late >= self.period {
                debug!("tick overran by {} ms", late.as_millis());
                self.next = now + self.period;
            } else {
                self.next += self.period;
            }
        }
    }
}

fn deliver<S: OutputSink>(outcome: TickOutcome, sink: &mut S) -> Result<()> {
    if let TickOutcome::Sampled { frame, events } = outcome {
        for ev in &events {
            sink.on_gesture(ev)?;
        }
        sink.on_frame(frame)?;
    }
    Ok(())
}

pub fn run<D, S, F>(
    pipeline: &mut Pipeline<D>,
    sink: &mut S,
    ticker: &mut Ticker,
    stop: &AtomicBool,
    mut between_ticks: F,
) -> Result<()>
where
    D: AdcDriver,
    S: OutputSink,
    F: FnMut(&Pipeline<D>) -> bool,
{
    while !stop.load(Ordering::Relaxed) {
        let outcome = pipeline.tick(ticker.elapsed_ms());
        deliver(outcome, sink)?;
        if !between_ticks(pipeline) {
            info!("loop stop requested");
            break;
        }
        ticker.wait();
    }
    Ok(())
}

/// A `!` line in a trace is exactly one failed tick, so replay never retries.
pub fn replay_pipeline(adc: ReplayAdc, profile: &Profile) -> Pipeline<ReplayAdc> {
    let mut profile = profile.clone();
    profile.sensor.retries = 0;
    Pipeline::new(adc, &profile, 0)
}

pub fn replay<S: OutputSink>(
    pipeline: &mut Pipeline<ReplayAdc>,
    sink: &mut S,
    period_ms: u64,
) -> Result<Counters> {
    let mut t_ms = 0;
    while !pipeline.sampler().driver().is_exhausted() {
        t_ms += period_ms;
        let outcome = pipeline.tick(t_ms);
        deliver(outcome, sink)?;
    }
    Ok(pipeline.status().counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::GestureEvent;
    use crate::pipeline::TickFrame;

    #[derive(Default)]
    struct Collect {
        frames: Vec<TickFrame>,
        gestures: Vec<GestureEvent>,
    }

    impl OutputSink for Collect {
        fn on_frame(&mut self, frame: TickFrame) -> Result<()> {
            self.frames.push(frame);
            Ok(())
        }
        fn on_gesture(&mut self, ev: &GestureEvent) -> Result<()> {
            self.gestures.push(*ev);
            Ok(())
        }
    }

    fn profile() -> Profile {
        let mut p = Profile::default();
        p.sensor.retries = 0;
        p
    }

    #[test]
    fn replay_delivers_every_sampled_tick() {
        // default calibration: 8800..17000, contact from 5500
        let adc = ReplayAdc::from_values([Some(0), Some(12000), Some(12000), None, Some(0), Some(0)]);
        let mut pl = Pipeline::new(adc, &profile(), 0);
        let mut sink = Collect::default();
        let counters = replay(&mut pl, &mut sink, 20).unwrap();

        assert_eq!(sink.frames.len(), 5);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.taps, 1);
        assert_eq!(sink.gestures.len(), 1);
        assert_eq!(sink.frames[0].t_ms, 20);
        assert!(sink.frames[1].touching);
    }

    #[test]
    fn failed_trace_line_is_one_skipped_tick() {
        let adc = ReplayAdc::parse("0\n12000\n!\n12000\n0\n").unwrap();
        let mut pl = replay_pipeline(adc, &Profile::default());
        let mut sink = Collect::default();
        let counters = replay(&mut pl, &mut sink, 20).unwrap();

        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.ticks, 4);
        let times: Vec<_> = sink.frames.iter().map(|f| f.t_ms).collect();
        assert_eq!(times, vec![20, 40, 80, 100]);
    }

    #[test]
    fn run_stops_when_asked_between_ticks() {
        let adc = ReplayAdc::from_values(vec![Some(0); 10]);
        let mut pl = Pipeline::new(adc, &profile(), 0);
        let mut sink = Collect::default();
        let mut ticker = Ticker::new(Duration::from_millis(1));
        let stop = AtomicBool::new(false);
        let mut ticks = 0;
        run(&mut pl, &mut sink, &mut ticker, &stop, |_| {
            ticks += 1;
            ticks < 3
        })
        .unwrap();
        assert_eq!(sink.frames.len(), 3);
    }

    #[test]
    fn raised_flag_prevents_any_tick() {
        let adc = ReplayAdc::from_values(vec![Some(0); 3]);
        let mut pl = Pipeline::new(adc, &profile(), 0);
        let mut sink = Collect::default();
        let mut ticker = Ticker::new(Duration::from_millis(1));
        let stop = AtomicBool::new(true);
        run(&mut pl, &mut sink, &mut ticker, &stop, |_| true).unwrap();
        assert!(sink.frames.is_empty());
        assert_eq!(pl.sampler().driver().remaining(), 3);
    }
}
