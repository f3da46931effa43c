use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::calibrate::SavedCalibration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    // discovered when absent
    pub device: Option<String>,
    pub channel: u8,
    pub sample_rate_hz: f64,
    pub io_timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: None,
            channel: 0,
            sample_rate_hz: 50.0,
            io_timeout_ms: 15,
            retries: 2,
            retry_backoff_ms: 2,
        }
    }
}

impl SensorConfig {
    pub fn period_ms(&self) -> u64 {
        ((1000.0 / self.sample_rate_hz).round() as u64).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub raw_min: i32,
    pub raw_max: i32,
    pub contact_min: i32,
    pub contact_max: i32,
    pub prefer_saved: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            raw_min: 8800,
            raw_max: 17000,
            contact_min: 5500,
            contact_max: 32767,
            prefer_saved: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TouchThresholds {
    pub enter_samples: u32,
    pub exit_samples: u32,
    pub smooth_ema: f64,
}

impl Default for TouchThresholds {
    fn default() -> Self {
        Self {
            enter_samples: 1,
            exit_samples: 2,
            smooth_ema: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GestureThresholds {
    pub min_motion: f64,
    pub min_stroke_distance: f64,
    pub hold_ms: u64,
    pub tap_ms: u64,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            min_motion: 0.004,
            min_stroke_distance: 0.2,
            hold_ms: 900,
            tap_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntensityParams {
    // per second
    pub decay_rate: f64,
    pub max_level: f64,
    pub stroke_gain: f64,
    pub stroke_cap: f64,
    /// Stroke speed (units/s) at which the stroke gain halves; 0 disables.
    pub speed_damping: f64,
    pub tap_gain: f64,
    pub hold_gain: f64,
}

impl Default for IntensityParams {
    fn default() -> Self {
        Self {
            decay_rate: 0.08,
            max_level: 1.0,
            stroke_gain: 0.25,
            stroke_cap: 0.2,
            speed_damping: 2.2,
            tap_gain: 0.04,
            hold_gain: 0.02,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    pub bar_width: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self { bar_width: 40 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub meta: Meta,
    pub sensor: SensorConfig,
    pub calibration: Calibration,
    pub touch: TouchThresholds,
    pub gesture: GestureThresholds,
    pub intensity: IntensityParams,
    pub display: DisplayOptions,
}

#[derive(Debug, Clone)]
pub struct ConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub saved_calibration: Option<SavedCalibration>,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("petpad"))
}

pub fn calibration_path(config_dir: &Path) -> PathBuf {
    config_dir.join("calibration.json")
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl ConfigState {
    pub fn load_or_install_default(profile_override: Option<&str>) -> Result<Self> {
        Self::load_in(&config_dir()?, profile_override)
    }

    pub fn load_in(cfgdir: &Path, profile_override: Option<&str>) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = match profile_override {
            Some(name) => name.to_string(),
            None => fs::read_to_string(&active_ptr)?.trim().to_string(),
        };
        let mut profile = load_profile(&profdir, &active_name)?;

        let mut saved_calibration = None;
        if profile.calibration.prefer_saved {
            let path = calibration_path(cfgdir);
            if path.exists() {
                let saved = SavedCalibration::load(&path)?;
                saved.apply(&mut profile.calibration);
                validate_profile(&profile).map_err(|e| {
                    anyhow!("saved calibration {} is unusable: {e}", path.display())
                })?;
                info!(
                    "using saved calibration {}..{} from {}",
                    saved.min_raw,
                    saved.max_raw,
                    path.display()
                );
                saved_calibration = Some(saved);
            }
        }

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir.to_path_buf(),
            profiles_dir: profdir,
            active_ptr,
            saved_calibration,
        })
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let adcs: Vec<String> = crate::adc::discover_adcs()
            .into_iter()
            .map(|d| format!("{} ({})", d.name, d.path))
            .collect();
        if adcs.is_empty() {
            warn!("doctor: no IIO ADC devices found");
        }
        serde_json::json!({
            "i2c_buses": list_i2c_buses(),
            "i2c_group_member": check_in_group("i2c"),
            "adc_devices": adcs,
            "configured_device": self.profile.sensor.device,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "saved_calibration": self.saved_calibration,
            "hints": {
                "load_driver": "dtoverlay=ads1115 in /boot/config.txt (or modprobe ti-ads1015)",
                "add_user_to_i2c_group": "sudo usermod -aG i2c $USER && newgrp i2c"
            }
        })
    }
}

pub fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    let profile = parse_profile(&txt).map_err(|e| anyhow!("{}: {e}", path.display()))?;
    Ok(profile)
}

pub fn parse_profile(txt: &str) -> Result<Profile> {
    let profile: Profile = toml::from_str(txt).map_err(|e| anyhow!("failed to parse: {e}"))?;
    validate_profile(&profile)?;
    Ok(profile)
}

pub fn validate_profile(p: &Profile) -> Result<()> {
    let c = &p.calibration;
    if c.raw_min >= c.raw_max {
        return Err(anyhow!(
            "calibration.raw_min ({}) must be below calibration.raw_max ({})",
            c.raw_min,
            c.raw_max
        ));
    }
    if c.contact_min > c.contact_max {
        return Err(anyhow!("calibration contact band is empty"));
    }

    let s = &p.sensor;
    if !(s.sample_rate_hz > 0.0 && s.sample_rate_hz <= 1000.0) {
        return Err(anyhow!("sensor.sample_rate_hz must be in (0, 1000]"));
    }
    if s.io_timeout_ms == 0 {
        return Err(anyhow!("sensor.io_timeout_ms must be positive"));
    }

    let t = &p.touch;
    if t.enter_samples == 0 || t.exit_samples == 0 {
        return Err(anyhow!("touch sample counts must be at least 1"));
    }
    if !(t.smooth_ema > 0.0 && t.smooth_ema <= 1.0) {
        return Err(anyhow!("touch.smooth_ema must be in (0, 1]"));
    }

    let g = &p.gesture;
    if !(g.min_motion > 0.0 && g.min_motion < 1.0) {
        return Err(anyhow!("gesture.min_motion must be in (0,1) normalized units"));
    }
    if !(g.min_stroke_distance > 0.0 && g.min_stroke_distance <= 1.0) {
        return Err(anyhow!(
            "gesture.min_stroke_distance must be in (0,1] normalized units"
        ));
    }
    if g.tap_ms == 0 || g.hold_ms == 0 {
        return Err(anyhow!("gesture durations must be positive"));
    }

    let i = &p.intensity;
    if i.max_level <= 0.0 {
        return Err(anyhow!("intensity.max_level must be positive"));
    }
    if !(i.decay_rate > 0.0) {
        return Err(anyhow!("intensity.decay_rate must be positive"));
    }
    let non_negative = [
        ("stroke_gain", i.stroke_gain),
        ("stroke_cap", i.stroke_cap),
        ("speed_damping", i.speed_damping),
        ("tap_gain", i.tap_gain),
        ("hold_gain", i.hold_gain),
    ];
    for (name, v) in non_negative {
        if !(v >= 0.0) {
            return Err(anyhow!("intensity.{name} must be non-negative"));
        }
    }

    if p.display.bar_width < 2 {
        return Err(anyhow!("display.bar_width must be at least 2"));
    }
    Ok(())
}

fn list_i2c_buses() -> Vec<String> {
    let mut out = vec![];
    if let Ok(rd) = fs::read_dir("/dev") {
        for e in rd.flatten() {
            if let Some(name) = e.file_name().to_str() {
                if name.starts_with("i2c-") {
                    out.push(format!("/dev/{name}"));
                }
            }
        }
    }
    out.sort();
    out
}

fn check_in_group(group: &str) -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        let prefix = format!("{group}:");
        for line in s.lines() {
            if line.starts_with(&prefix) {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_profile_is_valid() {
        let p = parse_profile(default_profile_text()).unwrap();
        assert_eq!(p.meta.name.as_deref(), Some("default"));
        assert_eq!(p.calibration, Calibration::default());
        assert_eq!(p.sensor.period_ms(), 20);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let p = parse_profile("[gesture]\nmin_stroke_distance = 0.3\n").unwrap();
        assert_eq!(p.gesture.min_stroke_distance, 0.3);
        assert_eq!(p.gesture.tap_ms, 250);
        assert_eq!(p.touch.exit_samples, 2);
    }

    #[test]
    fn inverted_calibration_is_fatal() {
        let err = parse_profile("[calibration]\nraw_min = 17000\nraw_max = 8800\n").unwrap_err();
        assert!(err.to_string().contains("raw_min"));

        let err = parse_profile("[calibration]\nraw_min = 100\nraw_max = 100\n").unwrap_err();
        assert!(err.to_string().contains("raw_max"));
    }

    #[test]
    fn bad_smoothing_factor_is_rejected() {
        assert!(parse_profile("[touch]\nsmooth_ema = 0.0\n").is_err());
        assert!(parse_profile("[touch]\nsmooth_ema = 1.5\n").is_err());
        assert!(parse_profile("[touch]\nsmooth_ema = 1.0\n").is_ok());
    }

    #[test]
    fn zero_motion_floor_is_rejected() {
        let err = parse_profile("[gesture]\nmin_motion = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("min_motion"));
        assert!(parse_profile("[gesture]\nmin_motion = 0.001\n").is_ok());
    }

    #[test]
    fn intensity_must_decay() {
        let err = parse_profile("[intensity]\ndecay_rate = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("decay_rate"));
        assert!(parse_profile("[intensity]\ndecay_rate = -0.1\n").is_err());
        assert!(parse_profile("[intensity]\ndecay_rate = 0.01\n").is_ok());
    }

    #[test]
    fn first_load_installs_default_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let st = ConfigState::load_in(dir.path(), None).unwrap();
        assert_eq!(st.active_name, "default");
        assert!(dir.path().join("profiles/default.toml").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("active")).unwrap(),
            "default"
        );
        assert_eq!(st.list_profiles(), vec!["default".to_string()]);
        assert!(st.saved_calibration.is_none());
    }

    #[test]
    fn set_active_switches_pointer_and_rejects_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = ConfigState::load_in(dir.path(), None).unwrap();
        fs::write(
            dir.path().join("profiles/gentle.toml"),
            "[gesture]\nmin_stroke_distance = 0.35\n",
        )
        .unwrap();

        st.set_active("gentle").unwrap();
        assert_eq!(st.profile.gesture.min_stroke_distance, 0.35);
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "gentle");
        assert!(st.set_active("missing").is_err());
        assert_eq!(st.active_name, "gentle");

        let again = ConfigState::load_in(dir.path(), None).unwrap();
        assert_eq!(again.active_name, "gentle");
    }

    #[test]
    fn saved_calibration_overrides_profile_range() {
        let dir = tempfile::tempdir().unwrap();
        let saved = SavedCalibration {
            min_raw: 9000,
            max_raw: 16000,
            cycles: 3,
            updated_unix: 0,
        };
        saved.save(&calibration_path(dir.path())).unwrap();

        let st = ConfigState::load_in(dir.path(), None).unwrap();
        assert_eq!(st.profile.calibration.raw_min, 9000);
        assert_eq!(st.profile.calibration.raw_max, 16000);
        assert_eq!(st.saved_calibration, Some(saved));
    }

    #[test]
    fn saved_calibration_ignored_when_profile_opts_out() {
        let dir = tempfile::tempdir().unwrap();
        ConfigState::load_in(dir.path(), None).unwrap();
        fs::write(
            dir.path().join("profiles/fixed.toml"),
            "[calibration]\nraw_min = 100\nraw_max = 200\nprefer_saved = false\n",
        )
        .unwrap();
        SavedCalibration {
            min_raw: 9000,
            max_raw: 16000,
            cycles: 1,
            updated_unix: 0,
        }
        .save(&calibration_path(dir.path()))
        .unwrap();

        let st = ConfigState::load_in(dir.path(), Some("fixed")).unwrap();
        assert_eq!(st.profile.calibration.raw_min, 100);
        assert!(st.saved_calibration.is_none());
    }

    #[test]
    fn degenerate_saved_calibration_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        SavedCalibration {
            min_raw: 12000,
            max_raw: 12000,
            cycles: 1,
            updated_unix: 0,
        }
        .save(&calibration_path(dir.path()))
        .unwrap();
        assert!(ConfigState::load_in(dir.path(), None).is_err());
    }
}
