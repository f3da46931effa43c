use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::adc::AdcDriver;
use crate::config::Calibration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCalibration {
    pub min_raw: i32,
    pub max_raw: i32,
    pub cycles: u32,
    pub updated_unix: u64,
}

impl SavedCalibration {
    pub fn load(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)? + "\n")?;
        Ok(())
    }

    pub fn apply(&self, cal: &mut Calibration) {
        cal.raw_min = self.min_raw;
        cal.raw_max = self.max_raw;
    }
}

#[derive(Debug, Clone)]
pub struct Calibrator {
    baseline: i32,
    min_raw: i32,
    max_raw: i32,
    cycles: u32,
    in_cycle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalStep {
    Waiting,
    Capturing,
    CycleDone,
}

impl Calibrator {
    pub fn new(baseline: i32) -> Self {
        Self {
            baseline,
            min_raw: i32::MAX,
            max_raw: i32::MIN,
            cycles: 0,
            in_cycle: false,
        }
    }

    pub fn push(&mut self, raw: i32) -> CalStep {
        if raw <= self.baseline {
            if self.in_cycle {
                self.in_cycle = false;
                return CalStep::CycleDone;
            }
            return CalStep::Waiting;
        }
        if !self.in_cycle {
            self.in_cycle = true;
            self.cycles += 1;
            info!("contact above baseline, cycle {}", self.cycles);
        }
        self.min_raw = self.min_raw.min(raw);
        self.max_raw = self.max_raw.max(raw);
        CalStep::Capturing
    }

    pub fn in_cycle(&self) -> bool {
        self.in_cycle
    }

    pub fn result(&self) -> Option<SavedCalibration> {
        if self.cycles == 0 || self.min_raw >= self.max_raw {
            return None;
        }
        let updated_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(SavedCalibration {
            min_raw: self.min_raw,
            max_raw: self.max_raw,
            cycles: self.cycles,
            updated_unix,
        })
    }
}

pub fn run<D: AdcDriver>(
    driver: &mut D,
    channel: u8,
    baseline: i32,
    period: Duration,
    out: &Path,
    stop: &AtomicBool,
) -> Result<Option<SavedCalibration>> {
    let mut cal = Calibrator::new(baseline);
    info!("calibrating channel {channel}, baseline {baseline}; sweep the full strip, Ctrl+C to finish");

    let save = |cal: &Calibrator| -> Result<Option<SavedCalibration>> {
        let Some(saved) = cal.result() else {
            return Ok(None);
        };
        saved.save(out)?;
        info!(
            "range {}..{} after {} cycle(s), saved to {}",
            saved.min_raw,
            saved.max_raw,
            saved.cycles,
            out.display()
        );
        Ok(Some(saved))
    };

    let mut last = None;
    while !stop.load(Ordering::Relaxed) {
        match driver.read_channel(channel) {
            Ok(raw) => {
                let step = cal.push(raw);
                debug!("raw {raw} -> {step:?}");
                if step == CalStep::CycleDone {
                    last = save(&cal)?;
                }
            }
            Err(e) => warn!("calibration read failed: {e}"),
        }
        thread::sleep(period);
    }

    if cal.in_cycle() {
        last = save(&cal)?;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::ReplayAdc;

    #[test]
    fn tracks_range_across_cycles() {
        let mut cal = Calibrator::new(6000);
        assert_eq!(cal.push(100), CalStep::Waiting);
        assert_eq!(cal.push(9000), CalStep::Capturing);
        assert_eq!(cal.push(16000), CalStep::Capturing);
        assert_eq!(cal.push(50), CalStep::CycleDone);
        assert_eq!(cal.push(50), CalStep::Waiting);
        cal.push(8700);
        cal.push(17100);
        cal.push(0);

        let r = cal.result().unwrap();
        assert_eq!((r.min_raw, r.max_raw, r.cycles), (8700, 17100, 2));
    }

    #[test]
    fn no_contact_no_result() {
        let mut cal = Calibrator::new(6000);
        cal.push(10);
        assert!(cal.result().is_none());
        cal.push(7000);
        assert!(cal.result().is_none());
    }

    #[test]
    fn apply_overrides_only_the_raw_range() {
        let saved = SavedCalibration {
            min_raw: 1,
            max_raw: 2,
            cycles: 1,
            updated_unix: 0,
        };
        let mut c = Calibration::default();
        saved.apply(&mut c);
        assert_eq!((c.raw_min, c.raw_max), (1, 2));
        assert_eq!(c.contact_min, Calibration::default().contact_min);
    }

    #[test]
    fn run_saves_each_finished_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("calibration.json");
        let mut adc = ReplayAdc::from_values([
            Some(0),
            Some(9100),
            Some(15000),
            None,
            Some(0),
        ]);
        // the failed read in the middle is only a warning
        let stop = AtomicBool::new(false);
        let mut driver = StopAfter {
            inner: &mut adc,
            left: 5,
            stop: &stop,
        };
        let saved = run(&mut driver, 0, 6000, Duration::ZERO, &out, &stop)
            .unwrap()
            .unwrap();
        assert_eq!((saved.min_raw, saved.max_raw), (9100, 15000));
        assert_eq!(SavedCalibration::load(&out).unwrap(), saved);
    }

    struct StopAfter<'a> {
        inner: &'a mut ReplayAdc,
        left: u32,
        stop: &'a AtomicBool,
    }

    impl AdcDriver for StopAfter<'_> {
        fn read_channel(&mut self, channel: u8) -> Result<i32, crate::error::SensorError> {
            self.left -= 1;
            if self.left == 0 {
                self.stop.store(true, Ordering::Relaxed);
            }
            self.inner.read_channel(channel)
        }
    }
}
