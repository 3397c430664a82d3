// src/diag.rs
//
// Status dump formatting for the remote terminal and the log.

use crate::scheduler::Millis;

const MILLIS_IN_DAY: Millis = 1000 * 60 * 60 * 24;
const MILLIS_IN_HOUR: Millis = 1000 * 60 * 60;
const MILLIS_IN_MINUTE: Millis = 1000 * 60;

pub fn format_uptime(uptime: Millis) -> String {
    let days = uptime / MILLIS_IN_DAY;
    let hours = (uptime % MILLIS_IN_DAY) / MILLIS_IN_HOUR;
    let minutes = (uptime % MILLIS_IN_HOUR) / MILLIS_IN_MINUTE;
    format!("Uptime: {:2}d{:2}h{:2}m", days, hours, minutes)
}

pub fn sensor_status(
    uptime: Millis,
    temperature: Option<f32>,
    humidity: Option<f32>,
    fan_speed: u16,
) -> Vec<String> {
    let fmt = |v: Option<f32>| v.map_or_else(|| "--".to_string(), |v| format!("{:3.1}", v));
    vec![
        format_uptime(uptime),
        format!("Temp: {} Humidity: {}", fmt(temperature), fmt(humidity)),
        format!("Fan Speed: {}%", fan_speed),
    ]
}

/// Snapshot of what the device dump reports.
#[derive(Debug, Clone)]
pub struct DeviceInfo<'a> {
    pub uptime: Millis,
    pub endpoint: Option<&'a str>,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub timers: usize,
}

pub fn device_status(info: &DeviceInfo<'_>) -> Vec<String> {
    let link = match (info.endpoint, info.connected) {
        (None, _) => "offline (no endpoint)".to_string(),
        (Some(ep), true) => format!("connected to {}", ep),
        (Some(ep), false) => format!(
            "disconnected from {} ({} reconnect attempts)",
            ep, info.reconnect_attempts
        ),
    };
    vec![
        format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        format!("Host: {}", hostname()),
        format!("PID: {}", std::process::id()),
        format!("Link: {}", link),
        format!("Timers: {}", info.timers),
        format_uptime(info.uptime),
    ]
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "unknown".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}
