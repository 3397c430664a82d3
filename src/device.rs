// src/device.rs
//
// Controller context: owns every piece of mutable state and is driven by the
// main loop one tick at a time.

use tracing::{debug, error, info, warn};

use crate::config::ControlConfig;
use crate::control::{FanController, LiveParameters, SensorReading};
use crate::diag::{self, DeviceInfo};
use crate::error::Result;
use crate::hardware::{ClimateSensor, PwmOutput, Switch, UpdateService};
use crate::link::{LinkAction, LinkState, LinkSupervisor};
use crate::remote::{
    KEY_HUMIDITY, KEY_TEMPERATURE, KEY_TERMINAL, KEY_UPTIME, TelemetryLink, TelemetryValue,
};
use crate::scheduler::{Millis, Scheduler};
use crate::sync::{self, FollowUp, InboundEvent, Knobs, ParamChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    ToggleLiveness,
    PollSensor,
    Heartbeat,
    Reconnect,
}

/// External collaborators the controller drives.
pub struct Peripherals {
    pub sensor: Box<dyn ClimateSensor>,
    pub fan: Box<dyn PwmOutput>,
    pub link: Box<dyn TelemetryLink>,
    pub updates: Box<dyn UpdateService>,
    pub liveness: Box<dyn Switch>,
    pub relay: Box<dyn Switch>,
}

pub struct Device {
    config: ControlConfig,
    endpoint: Option<String>,
    params: LiveParameters,
    fan: FanController,
    link: LinkSupervisor,
    scheduler: Scheduler<Task>,
    /// Last valid reading; invalid readings never overwrite it.
    climate: Option<SensorReading>,
    relay: bool,
    io: Peripherals,
    booted_at: Millis,
    now: Millis,
}

impl Device {
    /// Brings the controller up at `now`: fan at full speed, relay held high,
    /// periodic tasks registered and a first connection attempt under way.
    pub fn new(
        config: ControlConfig,
        endpoint: Option<String>,
        io: Peripherals,
        now: Millis,
    ) -> Result<Self> {
        let mut scheduler = Scheduler::new();
        scheduler.every(now, config.liveness_ms, Task::ToggleLiveness)?;
        scheduler.every(now, config.sensor_poll_ms, Task::PollSensor)?;
        scheduler.every(now, config.heartbeat_ms, Task::Heartbeat)?;

        let mut device = Device {
            params: config.live_parameters(),
            fan: FanController::new(config.duty_max),
            link: LinkSupervisor::new(),
            scheduler,
            climate: None,
            relay: true,
            io,
            booted_at: now,
            now,
            endpoint,
            config,
        };

        device.drive_relay();
        device.refresh_fan();
        device.io.link.connect();
        for line in device.device_status() {
            info!("{}", line);
        }
        Ok(device)
    }

    // --- Accessors ---

    pub fn params(&self) -> &LiveParameters {
        &self.params
    }

    pub fn fan(&self) -> &FanController {
        &self.fan
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.link.attempts()
    }

    pub fn climate(&self) -> Option<SensorReading> {
        self.climate
    }

    pub fn relay(&self) -> bool {
        self.relay
    }

    pub fn uptime(&self) -> Millis {
        self.now.saturating_sub(self.booted_at)
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        self.scheduler.next_deadline()
    }

    // --- Control Loop ---

    /// One pass of the cooperative loop.
    pub fn tick(&mut self, now: Millis) {
        self.now = now;

        self.io.updates.poll();

        let connected = self.io.link.is_connected();
        match self.link.observe(connected) {
            LinkAction::Resync => self.on_connected(),
            LinkAction::ArmBackoff => self.arm_backoff(),
            LinkAction::None => {}
        }

        if connected {
            for event in self.io.link.run() {
                self.handle_event(event);
            }
        }

        for task in self.scheduler.due(now) {
            self.run_task(task);
        }
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::ToggleLiveness => {
                if let Err(e) = self.io.liveness.toggle() {
                    debug!("Error toggling liveness indicator: {}", e);
                }
            }
            Task::PollSensor => self.poll_sensor(),
            Task::Heartbeat => {
                let uptime = diag::format_uptime(self.uptime());
                self.io.link.publish(KEY_UPTIME, uptime.into());
            }
            Task::Reconnect => self.reconnect(),
        }
    }

    // --- Connectivity ---

    fn on_connected(&mut self) {
        info!("Link up; requesting parameter resync");
        for channel in ParamChannel::RESYNC {
            self.io.link.request_resync(channel);
        }
    }

    fn arm_backoff(&mut self) {
        match self
            .scheduler
            .after(self.now, self.config.backoff_ms, Task::Reconnect)
        {
            Ok(()) => info!(
                "Starting reconnection timer in {} seconds...",
                self.config.backoff_ms / 1000
            ),
            Err(e) => {
                error!("Could not arm reconnection timer: {}", e);
                self.link.disarm();
            }
        }
    }

    fn reconnect(&mut self) {
        match self.link.backoff_expired() {
            Some(attempt) => {
                info!("Attempting reconnection #{}", attempt);
                self.io.link.connect();
            }
            None => debug!("Reconnection timer fired after link recovered"),
        }
    }

    // --- Sensor Polling ---

    fn poll_sensor(&mut self) {
        let reading = SensorReading {
            temperature: self.io.sensor.read_temperature(),
            humidity: self.io.sensor.read_humidity(),
        };

        if reading.is_valid() {
            self.fan.record_reading(true);
            self.climate = Some(reading);
            self.io.link.publish(KEY_TEMPERATURE, reading.temperature.into());
            if let Some(humidity) = reading.humidity {
                self.io.link.publish(KEY_HUMIDITY, humidity.into());
            }
        } else {
            warn!("Failed to read from sensor; running fan at full speed");
            self.fan.record_reading(false);
            self.io
                .link
                .publish(KEY_TERMINAL, "Failed to read from sensor!".into());
        }
        self.refresh_fan();
    }

    /// Recomputes the target from the last known temperature and applies it.
    fn refresh_fan(&mut self) {
        let target = match self.climate {
            Some(reading) => self.params.target_for(reading.temperature),
            None => i32::from(self.config.duty_max),
        };
        let duty = self
            .fan
            .apply(target, &mut *self.io.fan, &mut *self.io.link);
        info!("Fan Speed: {}", duty);

        let lines = diag::sensor_status(
            self.uptime(),
            self.climate.map(|r| r.temperature),
            self.climate.and_then(|r| r.humidity),
            duty,
        );
        self.print_terminal(lines);
    }

    // --- Remote Parameters ---

    fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Set { channel, value } => {
                debug!(?channel, value, "Remote parameter update");
                let mut knobs = Knobs {
                    params: &mut self.params,
                    fan: &mut self.fan,
                    relay: &mut self.relay,
                };
                match sync::dispatch(channel, value, &mut knobs) {
                    FollowUp::RefreshFan => self.refresh_fan(),
                    FollowUp::DriveRelay => self.drive_relay(),
                }
            }
            InboundEvent::Terminal(text) => {
                if text.trim() == "?" {
                    let lines = self.device_status();
                    self.print_terminal(lines);
                } else {
                    self.print_terminal(vec!["Type '?' to dump status".to_string()]);
                }
            }
        }
    }

    fn drive_relay(&mut self) {
        if let Err(e) = self.io.relay.set(self.relay) {
            warn!("Error driving relay output: {}", e);
        }
    }

    // --- Diagnostics ---

    fn device_status(&self) -> Vec<String> {
        diag::device_status(&DeviceInfo {
            uptime: self.uptime(),
            endpoint: self.endpoint.as_deref(),
            connected: self.link.state() == LinkState::Connected,
            reconnect_attempts: self.link.attempts(),
            timers: self.scheduler.len(),
        })
    }

    fn print_terminal(&mut self, lines: Vec<String>) {
        self.io
            .link
            .publish(KEY_TERMINAL, TelemetryValue::Text(lines.join("\n")));
    }
}
