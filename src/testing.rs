// src/testing.rs
//
// Test doubles for the collaborators. Each mock is a cheap handle over shared
// state so a test can keep one clone while the device owns another.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fs, io,
    path::PathBuf,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::hardware::{ClimateSensor, PwmOutput, Switch, UpdateService};
use crate::remote::{TelemetryLink, TelemetryValue};
use crate::sync::{InboundEvent, ParamChannel};

/// Fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "thermofan-{}-{}-{}",
        name,
        std::process::id(),
        n
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

// --- Sensor ---

#[derive(Debug)]
struct SensorState {
    temperature: f32,
    humidity: Option<f32>,
    reads: usize,
}

#[derive(Debug, Clone)]
pub struct MockSensor {
    state: Rc<RefCell<SensorState>>,
}

impl MockSensor {
    pub fn new(temperature: f32, humidity: Option<f32>) -> Self {
        MockSensor {
            state: Rc::new(RefCell::new(SensorState {
                temperature,
                humidity,
                reads: 0,
            })),
        }
    }

    pub fn set(&self, temperature: f32, humidity: Option<f32>) {
        let mut state = self.state.borrow_mut();
        state.temperature = temperature;
        state.humidity = humidity;
    }

    pub fn reads(&self) -> usize {
        self.state.borrow().reads
    }
}

impl ClimateSensor for MockSensor {
    fn read_temperature(&mut self) -> f32 {
        let mut state = self.state.borrow_mut();
        state.reads += 1;
        state.temperature
    }

    fn read_humidity(&mut self) -> Option<f32> {
        self.state.borrow().humidity
    }
}

// --- PWM ---

#[derive(Debug, Clone, Default)]
pub struct MockPwm {
    pub writes: Rc<RefCell<Vec<u16>>>,
    fail: bool,
}

impl MockPwm {
    pub fn failing() -> Self {
        MockPwm {
            fail: true,
            ..MockPwm::default()
        }
    }
}

impl PwmOutput for MockPwm {
    fn write(&mut self, duty: u16) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::other("pwm unplugged"));
        }
        self.writes.borrow_mut().push(duty);
        Ok(())
    }
}

// --- Switch ---

#[derive(Debug, Default)]
struct SwitchState {
    on: bool,
    toggles: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockSwitch {
    state: Rc<RefCell<SwitchState>>,
}

impl MockSwitch {
    pub fn is_on_now(&self) -> bool {
        self.state.borrow().on
    }

    pub fn toggles(&self) -> usize {
        self.state.borrow().toggles
    }
}

impl Switch for MockSwitch {
    fn set(&mut self, on: bool) -> io::Result<()> {
        self.state.borrow_mut().on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.state.borrow().on
    }

    fn toggle(&mut self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.on = !state.on;
        state.toggles += 1;
        Ok(())
    }
}

// --- Telemetry Link ---

#[derive(Debug, Default)]
pub struct LinkLog {
    pub connected: bool,
    pub connect_calls: usize,
    pub published: Vec<(String, TelemetryValue)>,
    pub inbound: VecDeque<InboundEvent>,
    pub resyncs: Vec<ParamChannel>,
    pub update_polls: usize,
}

/// Link whose connectivity is flipped by the test; `connect` only counts.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    pub state: Rc<RefCell<LinkLog>>,
}

impl MockLink {
    pub fn connected() -> Self {
        let link = MockLink::default();
        link.set_connected(true);
        link
    }

    pub fn disconnected() -> Self {
        MockLink::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    pub fn push_event(&self, event: InboundEvent) {
        self.state.borrow_mut().inbound.push_back(event);
    }

    pub fn published_for(&self, key: &str) -> Vec<TelemetryValue> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl TelemetryLink for MockLink {
    fn is_connected(&mut self) -> bool {
        self.state.borrow().connected
    }

    fn connect(&mut self) {
        self.state.borrow_mut().connect_calls += 1;
    }

    fn run(&mut self) -> Vec<InboundEvent> {
        self.state.borrow_mut().inbound.drain(..).collect()
    }

    fn publish(&mut self, key: &str, value: TelemetryValue) {
        let mut state = self.state.borrow_mut();
        if state.connected {
            state.published.push((key.to_string(), value));
        }
    }

    fn request_resync(&mut self, channel: ParamChannel) {
        let mut state = self.state.borrow_mut();
        if state.connected {
            state.resyncs.push(channel);
        }
    }
}

impl UpdateService for MockLink {
    fn poll(&mut self) {
        self.state.borrow_mut().update_polls += 1;
    }
}
