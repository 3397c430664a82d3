// src/control.rs
use tracing::{debug, warn};

use crate::hardware::PwmOutput;
use crate::remote::{KEY_FAN_SPEED, TelemetryLink};

// --- Speed Calculation ---

/// Maps a temperature onto a duty cycle.
///
/// Below `start_temp` the fan is off, above `max_temp` it runs at
/// `high_speed`, and in between the temperature is interpolated linearly onto
/// `[low_speed, high_speed]`, rounded to the nearest duty unit.
pub fn compute_target(
    temp: f32,
    start_temp: i32,
    max_temp: i32,
    low_speed: i32,
    high_speed: i32,
) -> i32 {
    let temp = f64::from(temp);
    if temp < f64::from(start_temp) {
        return 0;
    }
    if temp > f64::from(max_temp) {
        return high_speed;
    }
    if max_temp <= start_temp {
        return high_speed;
    }

    let (lo, hi) = (low_speed.min(high_speed), low_speed.max(high_speed));
    let temp_range = f64::from(max_temp) - f64::from(start_temp);
    let speed_range = f64::from(high_speed) - f64::from(low_speed);
    let target = f64::from(low_speed) + (temp - f64::from(start_temp)) * speed_range / temp_range;

    target.round().clamp(f64::from(lo), f64::from(hi)) as i32
}

// --- Live Parameters ---

/// Remotely tunable fan curve. Lives only in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveParameters {
    start_temp: i32,
    max_temp: i32,
    low_speed: i32,
    high_speed: i32,
}

impl LiveParameters {
    /// Builds a parameter set, pulling inverted pairs together the same way a
    /// remote update would.
    pub fn new(start_temp: i32, max_temp: i32, low_speed: i32, high_speed: i32) -> Self {
        let high_speed = high_speed.max(0);
        LiveParameters {
            start_temp: start_temp.min(max_temp),
            max_temp,
            low_speed: low_speed.clamp(0, high_speed),
            high_speed,
        }
    }

    pub fn start_temp(&self) -> i32 {
        self.start_temp
    }

    pub fn max_temp(&self) -> i32 {
        self.max_temp
    }

    pub fn low_speed(&self) -> i32 {
        self.low_speed
    }

    pub fn high_speed(&self) -> i32 {
        self.high_speed
    }

    /// Never exceeds the current max temperature.
    pub fn set_start_temp(&mut self, value: i32) {
        self.start_temp = value.min(self.max_temp);
    }

    /// Never drops below the current start temperature.
    pub fn set_max_temp(&mut self, value: i32) {
        self.max_temp = value.max(self.start_temp);
    }

    /// Kept within `[0, high_speed]`.
    pub fn set_low_speed(&mut self, value: i32) {
        self.low_speed = value.clamp(0, self.high_speed);
    }

    pub fn target_for(&self, temp: f32) -> i32 {
        compute_target(
            temp,
            self.start_temp,
            self.max_temp,
            self.low_speed,
            self.high_speed,
        )
    }
}

// --- Sensor Reading ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature: f32,
    /// `None` when the sensor has no humidity channel.
    pub humidity: Option<f32>,
}

impl SensorReading {
    /// A NaN on either channel makes the whole reading untrustworthy.
    pub fn is_valid(&self) -> bool {
        !self.temperature.is_nan() && !self.humidity.is_some_and(f32::is_nan)
    }
}

// --- Fan Controller ---

/// Owns the commanded duty cycle and the policies layered over the curve.
#[derive(Debug)]
pub struct FanController {
    duty_max: u16,
    current: u16,
    override_active: bool,
    /// Set while the latest sensor reading (or the lack of any reading so far)
    /// cannot be trusted.
    sensor_fault: bool,
}

impl FanController {
    /// Starts at full speed with no trusted reading.
    pub fn new(duty_max: u16) -> Self {
        FanController {
            duty_max,
            current: duty_max,
            override_active: false,
            sensor_fault: true,
        }
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    pub fn override_active(&self) -> bool {
        self.override_active
    }

    pub fn sensor_fault(&self) -> bool {
        self.sensor_fault
    }

    pub fn set_override(&mut self, active: bool) {
        self.override_active = active;
    }

    pub fn record_reading(&mut self, valid: bool) {
        self.sensor_fault = !valid;
    }

    /// Duty cycle that `apply` would command for `target`.
    pub fn effective(&self, target: i32) -> u16 {
        if self.override_active || self.sensor_fault {
            return self.duty_max;
        }
        target.clamp(0, i32::from(self.duty_max)) as u16
    }

    /// Commands the actuator and reports the result. Safe to repeat.
    pub fn apply(
        &mut self,
        target: i32,
        pwm: &mut dyn PwmOutput,
        link: &mut dyn TelemetryLink,
    ) -> u16 {
        let duty = self.effective(target);
        self.current = duty;

        if let Err(e) = pwm.write(duty) {
            warn!("Error writing fan duty {}: {}", duty, e);
        }
        debug!(
            target,
            duty,
            override_active = self.override_active,
            sensor_fault = self.sensor_fault,
            "Applied fan duty"
        );
        link.publish(KEY_FAN_SPEED, duty.into());
        duty
    }
}
