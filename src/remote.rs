// src/remote.rs
//
// Telemetry/control link. The wire format is newline-delimited JSON over TCP.

use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sync::{InboundEvent, ParamChannel};

// --- Telemetry Keys ---

pub const KEY_UPTIME: &str = "uptime";
pub const KEY_TEMPERATURE: &str = "temperature";
pub const KEY_HUMIDITY: &str = "humidity";
pub const KEY_TERMINAL: &str = "terminal";
pub const KEY_FAN_SPEED: &str = "fan_speed";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LINE: usize = 4096;
/// Unsent bytes held while the socket pushes back.
const MAX_OUTBOX: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<u16> for TelemetryValue {
    fn from(v: u16) -> Self {
        TelemetryValue::Int(i64::from(v))
    }
}

impl From<f32> for TelemetryValue {
    /// Goes through the shortest decimal form so 25.3 stays 25.3 on the wire.
    fn from(v: f32) -> Self {
        TelemetryValue::Float(v.to_string().parse().unwrap_or(f64::NAN))
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

/// Remote telemetry/control channel. Connectivity may drop at any time.
pub trait TelemetryLink {
    /// Also reaps a finished connection attempt, hence `&mut`.
    fn is_connected(&mut self) -> bool;

    /// Starts a connection attempt without waiting for it.
    fn connect(&mut self);

    /// Services the connection and hands back inbound events received since
    /// the last call.
    fn run(&mut self) -> Vec<InboundEvent>;

    /// Dropped silently while disconnected.
    fn publish(&mut self, key: &str, value: TelemetryValue);

    /// Asks the remote side to push its current value for `channel` again.
    fn request_resync(&mut self, channel: ParamChannel);
}

// --- Wire Messages ---

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Outbound<'a> {
    Hello {
        device: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<&'a str>,
    },
    Publish {
        key: &'a str,
        value: &'a TelemetryValue,
    },
    Sync {
        channel: ParamChannel,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Inbound {
    Set { channel: ParamChannel, value: i32 },
    Terminal { text: String },
}

impl From<Inbound> for InboundEvent {
    fn from(msg: Inbound) -> Self {
        match msg {
            Inbound::Set { channel, value } => InboundEvent::Set { channel, value },
            Inbound::Terminal { text } => InboundEvent::Terminal(text),
        }
    }
}

pub fn decode_line(line: &str) -> Result<InboundEvent> {
    serde_json::from_str::<Inbound>(line)
        .map(InboundEvent::from)
        .map_err(|e| Error::Protocol(format!("{} in {:?}", e, line)))
}

fn encode_line(msg: &Outbound<'_>) -> Vec<u8> {
    // Serializing these plain structs cannot fail.
    let mut line = serde_json::to_vec(msg).unwrap_or_default();
    line.push(b'\n');
    line
}

// --- TCP Link ---

pub struct TcpLink {
    endpoint: String,
    device: String,
    token: Option<String>,
    stream: Option<TcpStream>,
    pending: Option<Receiver<io::Result<TcpStream>>>,
    inbox: Vec<u8>,
    /// Whole frames only, possibly with the head of the first already sent.
    outbox: Vec<u8>,
}

impl TcpLink {
    pub fn new(endpoint: String, device: String, token: Option<String>) -> Self {
        TcpLink {
            endpoint,
            device,
            token,
            stream: None,
            pending: None,
            inbox: Vec::new(),
            outbox: Vec::new(),
        }
    }

    fn reap_pending(&mut self) {
        let Some(rx) = &self.pending else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(stream)) => {
                self.pending = None;
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("Could not make link to {} non-blocking: {}", self.endpoint, e);
                    return;
                }
                let _ = stream.set_nodelay(true);
                info!("Connected to {}", self.endpoint);
                self.stream = Some(stream);
                self.inbox.clear();
                self.outbox.clear();
                let hello = encode_line(&Outbound::Hello {
                    device: &self.device,
                    token: self.token.as_deref(),
                });
                self.write_line(&hello);
            }
            Ok(Err(e)) => {
                self.pending = None;
                info!("Connection to {} failed: {}", self.endpoint, e);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.pending = None,
        }
    }

    fn send(&mut self, msg: &Outbound<'_>) {
        let line = encode_line(msg);
        self.write_line(&line);
    }

    fn write_line(&mut self, line: &[u8]) {
        if self.stream.is_none() {
            return;
        }
        if self.outbox.len() + line.len() > MAX_OUTBOX {
            debug!("Outbound backlog full; dropping frame");
            return;
        }
        self.outbox.extend_from_slice(line);
        self.flush_outbox();
    }

    fn flush_outbox(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        while !self.outbox.is_empty() {
            match stream.write(&self.outbox) {
                Ok(0) => {
                    self.drop_connection("closed by peer");
                    return;
                }
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.drop_connection(&e.to_string());
                    return;
                }
            }
        }
    }

    fn drop_connection(&mut self, reason: &str) {
        if self.stream.take().is_some() {
            warn!("Link to {} lost: {}", self.endpoint, reason);
        }
        self.inbox.clear();
        self.outbox.clear();
    }

    fn fill_inbox(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut buf = [0u8; 512];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.drop_connection("closed by peer");
                    return;
                }
                Ok(n) => self.inbox.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.drop_connection(&e.to_string());
                    return;
                }
            }
        }
    }

    fn drain_lines(&mut self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.inbox.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.inbox.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match decode_line(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("{}", e),
            }
        }
        if self.inbox.len() > MAX_LINE {
            warn!("Discarding {} bytes of unterminated input", self.inbox.len());
            self.inbox.clear();
        }
        events
    }
}

impl TelemetryLink for TcpLink {
    fn is_connected(&mut self) -> bool {
        self.reap_pending();
        self.stream.is_some()
    }

    fn connect(&mut self) {
        if self.stream.is_some() || self.pending.is_some() {
            return;
        }
        let endpoint = self.endpoint.clone();
        let (tx, rx) = mpsc::channel();
        debug!("Connecting to {}", endpoint);
        let spawned = thread::Builder::new()
            .name("link-connect".into())
            .spawn(move || {
                let _ = tx.send(open_stream(&endpoint));
            });
        match spawned {
            Ok(_) => self.pending = Some(rx),
            Err(e) => warn!("Could not start connection attempt: {}", e),
        }
    }

    fn run(&mut self) -> Vec<InboundEvent> {
        self.flush_outbox();
        self.fill_inbox();
        self.drain_lines()
    }

    fn publish(&mut self, key: &str, value: TelemetryValue) {
        self.send(&Outbound::Publish { key, value: &value });
    }

    fn request_resync(&mut self, channel: ParamChannel) {
        self.send(&Outbound::Sync { channel });
    }
}

fn open_stream(endpoint: &str) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} did not resolve to any address", endpoint),
    );
    for addr in endpoint.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

// --- Offline Link ---

/// Used when no endpoint is configured; the controller runs purely locally.
#[derive(Debug, Default)]
pub struct OfflineLink;

impl TelemetryLink for OfflineLink {
    fn is_connected(&mut self) -> bool {
        false
    }

    fn connect(&mut self) {
        debug!("No telemetry endpoint configured; staying offline");
    }

    fn run(&mut self) -> Vec<InboundEvent> {
        Vec::new()
    }

    fn publish(&mut self, _: &str, _: TelemetryValue) {}

    fn request_resync(&mut self, _: ParamChannel) {}
}
