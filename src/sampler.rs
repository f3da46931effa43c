use crate::adc::AdcDriver;
use crate::config::Calibration;
use crate::error::SensorError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t_ms: u64,
    pub raw: i32,
    /// `None` when nothing is pressing the strip.
    pub position: Option<f64>,
}

impl Sample {
    pub fn is_touch(&self) -> bool {
        self.position.is_some()
    }
}

pub fn normalize(raw: i32, cal: &Calibration) -> Option<f64> {
    if raw < cal.contact_min || raw > cal.contact_max {
        return None;
    }
    let span = f64::from(cal.raw_max) - f64::from(cal.raw_min);
    let pos = (f64::from(raw) - f64::from(cal.raw_min)) / span;
    Some(pos.clamp(0.0, 1.0))
}

pub struct Sampler<D> {
    driver: D,
    channel: u8,
    cal: Calibration,
}

impl<D: AdcDriver> Sampler<D> {
    pub fn new(driver: D, channel: u8, cal: Calibration) -> Self {
        Self {
            driver,
            channel,
            cal,
        }
    }

    pub fn poll(&mut self, t_ms: u64) -> Result<Sample, SensorError> {
        let raw = self.driver.read_channel(self.channel)?;
        Ok(Sample {
            t_ms,
            raw,
            position: normalize(raw, &self.cal),
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}
