// src/config.rs
use std::{fs, path::PathBuf};

use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::{info, warn};

use crate::control::LiveParameters;
use crate::error::{Error, Result};
use crate::scheduler::Millis;

// --- Defaults ---

/// Top of the duty-cycle range (0 = off).
pub const DUTY_MAX: u16 = 100;
pub const PWM_FREQUENCY_HZ: u32 = 25_000;

pub const SENSOR_POLL_MS: Millis = 2_000;
pub const HEARTBEAT_MS: Millis = 60_000;
pub const LIVENESS_MS: Millis = 1_000;
pub const BACKOFF_MS: Millis = 60_000;
pub const LOOP_PERIOD_MS: Millis = 10;

/// Curve defaults are in °F, so readings default to °F as well.
pub const FAN_START_TEMP: i32 = 75;
pub const FAN_MAX_TEMP: i32 = 90;
pub const DEFAULT_FAHRENHEIT: bool = true;
pub const PWM_LOW_SPEED: i32 = 40;
pub const PWM_HIGH_SPEED: i32 = DUTY_MAX as i32;

pub const DEFAULT_DEVICE_NAME: &str = "thermofan";

/// Everything the control core needs at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConfig {
    pub sensor_poll_ms: Millis,
    pub heartbeat_ms: Millis,
    pub liveness_ms: Millis,
    pub backoff_ms: Millis,
    pub duty_max: u16,
    pub start_temp: i32,
    pub max_temp: i32,
    pub low_speed: i32,
    pub high_speed: i32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            sensor_poll_ms: SENSOR_POLL_MS,
            heartbeat_ms: HEARTBEAT_MS,
            liveness_ms: LIVENESS_MS,
            backoff_ms: BACKOFF_MS,
            duty_max: DUTY_MAX,
            start_temp: FAN_START_TEMP,
            max_temp: FAN_MAX_TEMP,
            low_speed: PWM_LOW_SPEED,
            high_speed: PWM_HIGH_SPEED,
        }
    }
}

impl ControlConfig {
    /// Boot-time sanity check. Live remote updates are clamped instead.
    pub fn validate(&self) -> Result<()> {
        if self.start_temp > self.max_temp {
            return Err(Error::Config(format!(
                "start_temp ({}) must not exceed max_temp ({})",
                self.start_temp, self.max_temp
            )));
        }
        if self.low_speed < 0 || self.low_speed > self.high_speed {
            return Err(Error::Config(format!(
                "low_speed ({}) must be within 0..={} (high_speed)",
                self.low_speed, self.high_speed
            )));
        }
        if self.duty_max == 0 || self.high_speed > i32::from(self.duty_max) {
            return Err(Error::Config(format!(
                "high_speed ({}) must be within 0..={} (duty_max)",
                self.high_speed, self.duty_max
            )));
        }
        for (name, value) in [
            ("sensor_poll_ms", self.sensor_poll_ms),
            ("heartbeat_ms", self.heartbeat_ms),
            ("liveness_ms", self.liveness_ms),
            ("backoff_ms", self.backoff_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    pub fn live_parameters(&self) -> LiveParameters {
        LiveParameters::new(self.start_temp, self.max_temp, self.low_speed, self.high_speed)
    }
}

// --- Config File Struct ---

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    temp_sensor_spec: Option<String>,
    humidity_sensor_spec: Option<String>,
    fan_control_spec: Option<String>,
    fahrenheit: Option<bool>,
    led_path: Option<PathBuf>,
    relay_path: Option<PathBuf>,
    endpoint: Option<String>,
    device_name: Option<String>,
    token: Option<String>,
    start_temp: Option<i32>,
    max_temp: Option<i32>,
    low_speed: Option<i32>,
    high_speed: Option<i32>,
    duty_max: Option<u16>,
    pwm_frequency: Option<u32>,
    sensor_poll_ms: Option<Millis>,
    heartbeat_ms: Option<Millis>,
    liveness_ms: Option<Millis>,
    backoff_ms: Option<Millis>,
    loop_period_ms: Option<Millis>,
}

// --- Command Line Arguments ---

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Drives a cooling fan from a temperature sensor and reports to a remote endpoint.", long_about = None)]
pub struct CliArgs {
    /// Optional path to a TOML configuration file.
    #[arg(long, short = 'c', value_name = "FILE_PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Temperature sensor spec: <device_name>/<base_filename>, e.g. dht11/temp1.
    #[arg(long = "temp-sensor-spec", value_name = "SPEC")]
    pub temp_sensor_spec: Option<String>,

    /// Humidity sensor spec: <device_name>/<base_filename>, e.g. dht11/humidity1.
    #[arg(long = "humidity-sensor-spec", value_name = "SPEC")]
    pub humidity_sensor_spec: Option<String>,

    /// Fan PWM control spec: <device_name>/<filename>, e.g. pwmfan/pwm1.
    #[arg(long = "fan-control-spec", value_name = "SPEC")]
    pub fan_control_spec: Option<String>,

    /// Read temperatures in Celsius instead of Fahrenheit (start/max temps are then °C too).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub celsius: bool,

    /// sysfs file toggled as a liveness indicator (LED brightness or GPIO value).
    #[arg(long, value_name = "FILE_PATH")]
    pub led_path: Option<PathBuf>,

    /// sysfs file driving the remotely switchable relay.
    #[arg(long, value_name = "FILE_PATH")]
    pub relay_path: Option<PathBuf>,

    /// Telemetry endpoint as host:port. Runs offline when absent.
    #[arg(long, value_name = "HOST:PORT")]
    pub endpoint: Option<String>,

    /// Name announced to the telemetry endpoint.
    #[arg(long, value_name = "NAME")]
    pub device_name: Option<String>,

    // --- Control Parameters (overrides config file) ---
    #[arg(long, value_name = "TEMP")] pub start_temp: Option<i32>,
    #[arg(long, value_name = "TEMP")] pub max_temp: Option<i32>,
    #[arg(long, value_name = "DUTY")] pub low_speed: Option<i32>,
    #[arg(long, value_name = "DUTY")] pub high_speed: Option<i32>,
    #[arg(long, value_name = "MS")] pub sensor_poll_ms: Option<Millis>,
}

/// Fully merged settings (CLI > File > Default).
#[derive(Debug, Clone)]
pub struct Settings {
    pub control: ControlConfig,
    pub temp_sensor_spec: String,
    pub humidity_sensor_spec: Option<String>,
    pub fan_control_spec: String,
    pub fahrenheit: bool,
    pub led_path: Option<PathBuf>,
    pub relay_path: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub device_name: String,
    pub token: Option<String>,
    pub pwm_frequency: u32,
    pub loop_period_ms: Millis,
}

impl Settings {
    pub fn resolve(cli: CliArgs, file: FileConfig) -> Result<Settings> {
        let defaults = ControlConfig::default();
        let control = ControlConfig {
            sensor_poll_ms: cli
                .sensor_poll_ms
                .or(file.sensor_poll_ms)
                .unwrap_or(defaults.sensor_poll_ms),
            heartbeat_ms: file.heartbeat_ms.unwrap_or(defaults.heartbeat_ms),
            liveness_ms: file.liveness_ms.unwrap_or(defaults.liveness_ms),
            backoff_ms: file.backoff_ms.unwrap_or(defaults.backoff_ms),
            duty_max: file.duty_max.unwrap_or(defaults.duty_max),
            start_temp: cli.start_temp.or(file.start_temp).unwrap_or(defaults.start_temp),
            max_temp: cli.max_temp.or(file.max_temp).unwrap_or(defaults.max_temp),
            low_speed: cli.low_speed.or(file.low_speed).unwrap_or(defaults.low_speed),
            high_speed: cli
                .high_speed
                .or(file.high_speed)
                .unwrap_or_else(|| i32::from(file.duty_max.unwrap_or(defaults.duty_max))),
        };
        control.validate()?;

        let temp_sensor_spec = cli
            .temp_sensor_spec
            .or(file.temp_sensor_spec)
            .ok_or_else(|| Error::Config("Temp sensor spec must be provided".into()))?;
        let fan_control_spec = cli
            .fan_control_spec
            .or(file.fan_control_spec)
            .ok_or_else(|| Error::Config("Fan control spec must be provided".into()))?;

        let loop_period_ms = file.loop_period_ms.unwrap_or(LOOP_PERIOD_MS);
        if loop_period_ms == 0 {
            return Err(Error::Config("loop_period_ms must be greater than 0".into()));
        }

        Ok(Settings {
            control,
            temp_sensor_spec,
            humidity_sensor_spec: cli.humidity_sensor_spec.or(file.humidity_sensor_spec),
            fan_control_spec,
            fahrenheit: !cli.celsius && file.fahrenheit.unwrap_or(DEFAULT_FAHRENHEIT),
            led_path: cli.led_path.or(file.led_path),
            relay_path: cli.relay_path.or(file.relay_path),
            endpoint: cli.endpoint.or(file.endpoint),
            device_name: cli
                .device_name
                .or(file.device_name)
                .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            token: file.token,
            pwm_frequency: file.pwm_frequency.unwrap_or(PWM_FREQUENCY_HZ),
            loop_period_ms,
        })
    }
}

/// Finds and loads the configuration file
pub fn load_config_file(config_path: Option<PathBuf>) -> FileConfig {
    let mut config_path_to_load = config_path;

    if config_path_to_load.is_none() {
        // Check user config directory
        if let Some(proj_dirs) = ProjectDirs::from("org", "thermofan", "thermofan") {
            let user_config_path = proj_dirs.config_dir().join("config.toml");
            if user_config_path.exists() {
                info!("Using default config file: {}", user_config_path.display());
                config_path_to_load = Some(user_config_path);
            }
        }

        // Check current directory
        if config_path_to_load.is_none() {
            let current_dir_path = PathBuf::from("./thermofan.toml");
            if current_dir_path.exists() {
                info!("Using config file in current dir: {}", current_dir_path.display());
                config_path_to_load = Some(current_dir_path);
            }
        }
    }

    match config_path_to_load {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        warn!("Failed to parse config file '{}': {}", path.display(), e);
                        FileConfig::default()
                    }
                },
                Err(e) => {
                    warn!("Failed to read config file '{}': {}", path.display(), e);
                    FileConfig::default()
                }
            }
        }
        None => {
            info!("No config file specified or found in default locations.");
            FileConfig::default()
        }
    }
}
