// src/lib.rs
//
// Temperature-driven fan controller: the control core (curve, fan policy,
// link supervision, cooperative scheduling) and the host glue that wires it
// to hwmon sysfs files and a TCP telemetry endpoint.

pub mod config;
pub mod control;
pub mod device;
pub mod diag;
pub mod error;
pub mod hardware;
pub mod link;
pub mod remote;
pub mod scheduler;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
