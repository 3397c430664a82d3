// src/hardware.rs
use std::{
    fs::{self, ReadDir},
    io,
    path::{Path, PathBuf},
};

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

// --- Collaborator Interfaces ---

/// Temperature/humidity probe. A failed read is reported as NaN, never as an error.
pub trait ClimateSensor {
    fn read_temperature(&mut self) -> f32;

    /// `None` when the probe has no humidity channel.
    fn read_humidity(&mut self) -> Option<f32>;
}

/// PWM fan output taking duty-cycle units in `[0, duty_max]`.
pub trait PwmOutput {
    fn write(&mut self, duty: u16) -> io::Result<()>;
}

/// Digital output line (status LED, relay).
pub trait Switch {
    fn set(&mut self, on: bool) -> io::Result<()>;

    fn is_on(&self) -> bool;

    fn toggle(&mut self) -> io::Result<()> {
        let next = !self.is_on();
        self.set(next)
    }
}

/// Firmware-update service, serviced once per loop iteration.
pub trait UpdateService {
    fn poll(&mut self);
}

// --- Path Finding and Parsing Logic ---

const HWMON_BASE: &str = "/sys/class/hwmon";

pub fn parse_spec(spec: &str) -> Result<(&str, &str)> {
    spec.split_once('/')
        .ok_or_else(|| Error::Spec(spec.to_string()))
}

pub fn find_hwmon_path_by_name(device_name: &str) -> Result<PathBuf> {
    find_hwmon_path_in(Path::new(HWMON_BASE), device_name)
}

fn find_hwmon_path_in(base: &Path, device_name: &str) -> Result<PathBuf> {
    let entries: ReadDir = fs::read_dir(base).map_err(|e| Error::io(base, e))?;

    let mut found_path: Option<PathBuf> = None;

    for entry in entries {
        let entry = entry.map_err(|e| Error::io(base, e))?;
        let path = entry.path();

        if path.is_dir()
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("hwmon"))
        {
            let name_path = path.join("name");
            if name_path.exists() {
                let name_content =
                    fs::read_to_string(&name_path).map_err(|e| Error::io(&name_path, e))?;

                if name_content.trim() == device_name {
                    if found_path.is_some() {
                        return Err(Error::HwmonAmbiguous(device_name.to_string()));
                    }
                    found_path = Some(path);
                }
            }
        }
    }

    found_path.ok_or_else(|| Error::HwmonNotFound(device_name.to_string()))
}

/// Resolves `<device>/<base>` to the `<base>_input` file of that hwmon device.
pub fn resolve_input_path(spec: &str) -> Result<PathBuf> {
    let (device, base) = parse_spec(spec)?;
    let path = find_hwmon_path_by_name(device)?.join(format!("{}_input", base));
    info!("Resolved '{}' to {}", spec, path.display());
    Ok(path)
}

/// PWM control file plus the `_enable` and `_freq` files derived from it.
#[derive(Debug, Clone)]
pub struct PwmPaths {
    pub pwm: PathBuf,
    pub enable: PathBuf,
    pub freq: PathBuf,
}

pub fn resolve_pwm_paths(spec: &str) -> Result<PwmPaths> {
    let (device, file) = parse_spec(spec)?;
    let base = find_hwmon_path_by_name(device)?;
    let paths = PwmPaths {
        pwm: base.join(file),
        enable: base.join(format!("{}_enable", file)),
        freq: base.join(format!("{}_freq", file)),
    };
    info!(
        "Resolved '{}' to PWM {} (enable {})",
        spec,
        paths.pwm.display(),
        paths.enable.display()
    );
    Ok(paths)
}

// --- Sensor ---

/// hwmon/IIO style probe: integer files in milli-units.
#[derive(Debug)]
pub struct HwmonSensor {
    temp_path: PathBuf,
    humidity_path: Option<PathBuf>,
    fahrenheit: bool,
}

impl HwmonSensor {
    pub fn new(temp_path: PathBuf, humidity_path: Option<PathBuf>, fahrenheit: bool) -> Self {
        HwmonSensor {
            temp_path,
            humidity_path,
            fahrenheit,
        }
    }
}

fn read_milli(path: &Path) -> io::Result<f32> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse::<i32>()
        .map(|v| v as f32 / 1000.0)
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to parse value: {}", e),
            )
        })
}

impl ClimateSensor for HwmonSensor {
    fn read_temperature(&mut self) -> f32 {
        match read_milli(&self.temp_path) {
            Ok(celsius) if self.fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            Ok(celsius) => celsius,
            Err(e) => {
                debug!("Error reading {}: {}", self.temp_path.display(), e);
                f32::NAN
            }
        }
    }

    fn read_humidity(&mut self) -> Option<f32> {
        let path = self.humidity_path.as_ref()?;
        Some(read_milli(path).unwrap_or_else(|e| {
            debug!("Error reading {}: {}", path.display(), e);
            f32::NAN
        }))
    }
}

// --- Fan PWM ---

/// hwmon PWM attribute (0..=255), scaled from duty units.
#[derive(Debug)]
pub struct HwmonPwm {
    path: PathBuf,
    duty_max: u16,
}

impl HwmonPwm {
    pub fn new(path: PathBuf, duty_max: u16) -> Self {
        HwmonPwm {
            path,
            duty_max: duty_max.max(1),
        }
    }

    fn raw_value(&self, duty: u16) -> u8 {
        let duty = u32::from(duty.min(self.duty_max));
        let max = u32::from(self.duty_max);
        ((duty * 255 + max / 2) / max) as u8
    }
}

impl PwmOutput for HwmonPwm {
    fn write(&mut self, duty: u16) -> io::Result<()> {
        fs::write(&self.path, self.raw_value(duty).to_string())
    }
}

pub fn enable_manual_pwm(path: impl AsRef<Path>) -> io::Result<()> {
    fs::write(path, "1")
}

/// Best effort: most hwmon drivers do not expose a frequency attribute.
pub fn set_pwm_frequency(path: &Path, hz: u32) {
    if !path.exists() {
        debug!("No PWM frequency attribute at {}", path.display());
        return;
    }
    match fs::write(path, hz.to_string()) {
        Ok(()) => info!("PWM frequency set to {} Hz", hz),
        Err(e) => warn!("Failed to set PWM frequency at {}: {}", path.display(), e),
    }
}

// --- Guard Struct for Restoring Auto Mode ---

pub struct AutoModeGuard {
    pwm_enable_path: PathBuf,
    original_value: String,
}

impl AutoModeGuard {
    /// Records the current mode, then switches the PWM to manual control.
    pub fn take_manual(pwm_enable_path: PathBuf) -> Result<Self> {
        let original_value = fs::read_to_string(&pwm_enable_path)
            .map_err(|e| Error::io(&pwm_enable_path, e))?
            .trim()
            .to_string();
        info!("Original PWM mode value read as: '{}'", original_value);

        enable_manual_pwm(&pwm_enable_path).map_err(|e| Error::io(&pwm_enable_path, e))?;
        info!("Manual PWM control enabled.");

        Ok(AutoModeGuard {
            pwm_enable_path,
            original_value,
        })
    }

    fn restore(&self) {
        info!(
            "Restoring PWM mode to '{}' for {}",
            self.original_value,
            self.pwm_enable_path.display()
        );
        if let Err(e) = fs::write(&self.pwm_enable_path, &self.original_value) {
            error!(
                "Failed to restore PWM mode '{}' to {}: {}",
                self.original_value,
                self.pwm_enable_path.display(),
                e
            );
        }
    }
}

impl Drop for AutoModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

// --- Switches ---

/// sysfs LED `brightness` or GPIO `value` file.
#[derive(Debug)]
pub struct SysfsSwitch {
    path: PathBuf,
    on: bool,
}

impl SysfsSwitch {
    pub fn new(path: PathBuf) -> Self {
        SysfsSwitch { path, on: false }
    }
}

impl Switch for SysfsSwitch {
    fn set(&mut self, on: bool) -> io::Result<()> {
        fs::write(&self.path, if on { "1" } else { "0" })?;
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// Stand-in for an output line that is not wired.
#[derive(Debug, Default)]
pub struct NullSwitch {
    on: bool,
}

impl Switch for NullSwitch {
    fn set(&mut self, on: bool) -> io::Result<()> {
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

// --- Firmware Update ---

/// Host builds receive updates through the package manager, so there is
/// nothing to service.
#[derive(Debug, Default)]
pub struct NoUpdates;

impl UpdateService for NoUpdates {
    fn poll(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;

    #[test]
    fn parse_spec_splits_device_and_file() {
        assert_eq!(parse_spec("nct6775/pwm2").unwrap(), ("nct6775", "pwm2"));
        assert!(matches!(parse_spec("pwm2"), Err(Error::Spec(_))));
    }

    #[test]
    fn finds_hwmon_directory_by_name() {
        let base = scratch_dir("hwmon-lookup");
        for (dir, name) in [("hwmon0", "acpitz"), ("hwmon1", "nct6775"), ("other", "nct6775")] {
            fs::create_dir_all(base.join(dir)).unwrap();
            fs::write(base.join(dir).join("name"), format!("{name}\n")).unwrap();
        }

        assert_eq!(find_hwmon_path_in(&base, "nct6775").unwrap(), base.join("hwmon1"));
        assert!(matches!(
            find_hwmon_path_in(&base, "k10temp"),
            Err(Error::HwmonNotFound(_))
        ));
    }

    #[test]
    fn duplicate_hwmon_names_are_rejected() {
        let base = scratch_dir("hwmon-dupes");
        for dir in ["hwmon0", "hwmon1"] {
            fs::create_dir_all(base.join(dir)).unwrap();
            fs::write(base.join(dir).join("name"), "dht11").unwrap();
        }
        assert!(matches!(
            find_hwmon_path_in(&base, "dht11"),
            Err(Error::HwmonAmbiguous(_))
        ));
    }

    #[test]
    fn sensor_reads_milli_units_and_reports_failures_as_nan() {
        let dir = scratch_dir("sensor");
        let temp = dir.join("temp1_input");
        let humidity = dir.join("humidity1_input");
        fs::write(&temp, "25500\n").unwrap();
        fs::write(&humidity, "41000\n").unwrap();

        let mut sensor = HwmonSensor::new(temp.clone(), Some(humidity.clone()), false);
        assert_eq!(sensor.read_temperature(), 25.5);
        assert_eq!(sensor.read_humidity(), Some(41.0));

        let mut fahrenheit = HwmonSensor::new(temp.clone(), None, true);
        assert!((fahrenheit.read_temperature() - 77.9).abs() < 1e-4);
        assert_eq!(fahrenheit.read_humidity(), None);

        fs::write(&temp, "garbage").unwrap();
        fs::remove_file(&humidity).unwrap();
        assert!(sensor.read_temperature().is_nan());
        assert!(sensor.read_humidity().is_some_and(f32::is_nan));
    }

    #[test]
    fn pwm_scales_duty_units_to_hwmon_range() {
        let dir = scratch_dir("pwm");
        let path = dir.join("pwm1");
        let mut pwm = HwmonPwm::new(path.clone(), 100);

        for (duty, raw) in [(0, "0"), (40, "102"), (100, "255"), (140, "255")] {
            pwm.write(duty).unwrap();
            assert_eq!(fs::read_to_string(&path).unwrap(), raw, "duty {duty}");
        }
    }

    #[test]
    fn auto_mode_guard_restores_original_mode_on_drop() {
        let dir = scratch_dir("guard");
        let enable = dir.join("pwm1_enable");
        fs::write(&enable, "2\n").unwrap();

        {
            let _guard = AutoModeGuard::take_manual(enable.clone()).unwrap();
            assert_eq!(fs::read_to_string(&enable).unwrap(), "1");
        }
        assert_eq!(fs::read_to_string(&enable).unwrap(), "2");
    }

    #[test]
    fn sysfs_switch_toggles_file_value() {
        let dir = scratch_dir("switch");
        let path = dir.join("brightness");
        let mut led = SysfsSwitch::new(path.clone());

        led.toggle().unwrap();
        assert!(led.is_on());
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
        led.toggle().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }
}
