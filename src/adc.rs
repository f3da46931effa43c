//! ADC driver boundary: Linux IIO sysfs channels and a replayable trace.

use anyhow::{Result, anyhow};
use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crate::error::SensorError;

pub trait AdcDriver {
    fn read_channel(&mut self, channel: u8) -> Result<i32, SensorError>;
}

impl<T: AdcDriver + ?Sized> AdcDriver for Box<T> {
    fn read_channel(&mut self, channel: u8) -> Result<i32, SensorError> {
        (**self).read_channel(channel)
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
}

const IIO_ROOT: &str = "/sys/bus/iio/devices";

pub fn discover_adcs() -> Vec<DeviceInfo> {
    discover_adcs_in(Path::new(IIO_ROOT))
}

fn discover_adcs_in(root: &Path) -> Vec<DeviceInfo> {
    let mut out = vec![];
    if let Ok(rd) = fs::read_dir(root) {
        for e in rd.flatten() {
            let p = e.path();
            let is_device = p
                .file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.starts_with("iio:device"))
                .unwrap_or(false);
            if !is_device || voltage_channels(&p).is_empty() {
                continue;
            }
            let name = fs::read_to_string(p.join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            out.push(DeviceInfo {
                path: p.display().to_string(),
                name,
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn voltage_channels(dir: &Path) -> Vec<u8> {
    let mut chans = vec![];
    if let Ok(rd) = fs::read_dir(dir) {
        for e in rd.flatten() {
            let fname = e.file_name();
            let Some(s) = fname.to_str() else { continue };
            if let Some(idx) = s
                .strip_prefix("in_voltage")
                .and_then(|rest| rest.strip_suffix("_raw"))
            {
                if let Ok(ch) = idx.parse::<u8>() {
                    chans.push(ch);
                }
            }
        }
    }
    chans.sort_unstable();
    chans
}

#[derive(Debug)]
pub struct IioAdc {
    dir: PathBuf,
    io_timeout: Duration,
}

impl IioAdc {
    pub fn open(dir: impl Into<PathBuf>, io_timeout: Duration) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(anyhow!("IIO device not found at {}", dir.display()));
        }
        Ok(Self { dir, io_timeout })
    }

    pub fn open_or_discover(device: Option<&str>, io_timeout: Duration) -> Result<Self> {
        match device {
            Some(d) => Self::open(d, io_timeout),
            None => {
                let found = discover_adcs();
                let first = found.first().ok_or_else(|| {
                    anyhow!("no IIO ADC devices under {IIO_ROOT}; is the ADC driver loaded?")
                })?;
                log::info!("adc: using {} ({})", first.name, first.path);
                Self::open(&first.path, io_timeout)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl AdcDriver for IioAdc {
    fn read_channel(&mut self, channel: u8) -> Result<i32, SensorError> {
        let path = self.dir.join(format!("in_voltage{channel}_raw"));
        let started = Instant::now();
        let text = fs::read_to_string(&path)
            .map_err(|source| SensorError::Unavailable { channel, source })?;
        let elapsed = started.elapsed();
        if elapsed > self.io_timeout {
            return Err(SensorError::Timeout {
                channel,
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.io_timeout.as_millis() as u64,
            });
        }
        text.trim().parse::<i32>().map_err(|_| SensorError::Garbled {
            channel,
            text: text.trim().to_string(),
        })
    }
}

/// Replays a recorded trace: one raw value per line, `#` comments, and
/// `!` marking a failed read.
#[derive(Debug, Default)]
pub struct ReplayAdc {
    reads: VecDeque<Option<i32>>,
}

impl ReplayAdc {
    pub fn from_values(values: impl IntoIterator<Item = Option<i32>>) -> Self {
        Self {
            reads: values.into_iter().collect(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut reads = VecDeque::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "!" {
                reads.push_back(None);
                continue;
            }
            let v: i32 = line
                .parse()
                .map_err(|_| anyhow!("line {}: expected raw value or '!', got {line:?}", n + 1))?;
            reads.push_back(Some(v));
        }
        Ok(Self { reads })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        Self::parse(&txt)
    }

    pub fn remaining(&self) -> usize {
        self.reads.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.reads.is_empty()
    }
}

impl AdcDriver for ReplayAdc {
    fn read_channel(&mut self, channel: u8) -> Result<i32, SensorError> {
        match self.reads.pop_front() {
            Some(Some(v)) => Ok(v),
            Some(None) => Err(SensorError::Unavailable {
                channel,
                source: io::Error::new(io::ErrorKind::TimedOut, "recorded read failure"),
            }),
            None => Err(SensorError::Unavailable {
                channel,
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "trace exhausted"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_parses_values_comments_and_failures() {
        let mut adc = ReplayAdc::parse("# header\n100\n\n!\n  250 \n").unwrap();
        assert_eq!(adc.remaining(), 3);
        assert_eq!(adc.read_channel(0).unwrap(), 100);
        assert!(matches!(
            adc.read_channel(0),
            Err(SensorError::Unavailable { channel: 0, .. })
        ));
        assert_eq!(adc.read_channel(0).unwrap(), 250);
        assert!(adc.is_exhausted());
        assert!(adc.read_channel(0).is_err());
    }

    #[test]
    fn replay_rejects_garbage_lines() {
        let err = ReplayAdc::parse("100\nabc\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn iio_reads_raw_channel_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in_voltage0_raw"), "12345\n").unwrap();
        fs::write(dir.path().join("in_voltage1_raw"), "noise\n").unwrap();
        let mut adc = IioAdc::open(dir.path(), Duration::from_secs(1)).unwrap();

        assert_eq!(adc.read_channel(0).unwrap(), 12345);
        assert!(matches!(
            adc.read_channel(1),
            Err(SensorError::Garbled { channel: 1, .. })
        ));
        assert!(matches!(
            adc.read_channel(2),
            Err(SensorError::Unavailable { channel: 2, .. })
        ));
    }

    #[test]
    fn discovery_finds_devices_with_voltage_channels() {
        let root = tempfile::tempdir().unwrap();
        let adc = root.path().join("iio:device0");
        fs::create_dir(&adc).unwrap();
        fs::write(adc.join("name"), "ads1115\n").unwrap();
        fs::write(adc.join("in_voltage0_raw"), "0").unwrap();
        fs::write(adc.join("in_voltage3_raw"), "0").unwrap();
        let imu = root.path().join("iio:device1");
        fs::create_dir(&imu).unwrap();
        fs::write(imu.join("in_accel_x_raw"), "0").unwrap();

        let found = discover_adcs_in(root.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "ads1115");
        assert_eq!(voltage_channels(&adc), vec![0, 3]);
    }
}
