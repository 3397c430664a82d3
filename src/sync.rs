// src/sync.rs
//
// Remote parameter handlers. Every settable channel goes through one table so
// the clamp/recompute/apply sequence is written once.

use serde::{Deserialize, Serialize};

use crate::control::{FanController, LiveParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamChannel {
    Override,
    StartTemp,
    MaxTemp,
    LowSpeed,
    Relay,
}

impl ParamChannel {
    /// Channels re-requested from the remote side after every reconnect.
    pub const RESYNC: [ParamChannel; 4] = [
        ParamChannel::Override,
        ParamChannel::StartTemp,
        ParamChannel::LowSpeed,
        ParamChannel::MaxTemp,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Set { channel: ParamChannel, value: i32 },
    /// Free text typed into the remote diagnostic terminal.
    Terminal(String),
}

/// What the device still has to do once a handler has updated its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Recompute the target and re-apply it to the fan right away.
    RefreshFan,
    DriveRelay,
}

/// State reachable from a parameter handler.
pub struct Knobs<'a> {
    pub params: &'a mut LiveParameters,
    pub fan: &'a mut FanController,
    pub relay: &'a mut bool,
}

type Setter = fn(&mut Knobs<'_>, i32);

struct Handler {
    channel: ParamChannel,
    set: Setter,
    follow_up: FollowUp,
}

fn set_override(knobs: &mut Knobs<'_>, value: i32) {
    knobs.fan.set_override(value != 0);
}

fn set_start_temp(knobs: &mut Knobs<'_>, value: i32) {
    knobs.params.set_start_temp(value);
}

fn set_max_temp(knobs: &mut Knobs<'_>, value: i32) {
    knobs.params.set_max_temp(value);
}

fn set_low_speed(knobs: &mut Knobs<'_>, value: i32) {
    knobs.params.set_low_speed(value);
}

fn set_relay(knobs: &mut Knobs<'_>, value: i32) {
    *knobs.relay = value != 0;
}

/// Indexed by `ParamChannel` discriminant.
static HANDLERS: [Handler; 5] = [
    Handler {
        channel: ParamChannel::Override,
        set: set_override,
        follow_up: FollowUp::RefreshFan,
    },
    Handler {
        channel: ParamChannel::StartTemp,
        set: set_start_temp,
        follow_up: FollowUp::RefreshFan,
    },
    Handler {
        channel: ParamChannel::MaxTemp,
        set: set_max_temp,
        follow_up: FollowUp::RefreshFan,
    },
    Handler {
        channel: ParamChannel::LowSpeed,
        set: set_low_speed,
        follow_up: FollowUp::RefreshFan,
    },
    Handler {
        channel: ParamChannel::Relay,
        set: set_relay,
        follow_up: FollowUp::DriveRelay,
    },
];

/// Applies `value` to `channel` and reports what must happen next.
pub fn dispatch(channel: ParamChannel, value: i32, knobs: &mut Knobs<'_>) -> FollowUp {
    let handler = &HANDLERS[channel as usize];
    debug_assert_eq!(handler.channel, channel);
    (handler.set)(knobs, value);
    handler.follow_up
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        params: LiveParameters,
        fan: FanController,
        relay: bool,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                params: LiveParameters::new(75, 90, 40, 100),
                fan: FanController::new(100),
                relay: true,
            }
        }

        fn send(&mut self, channel: ParamChannel, value: i32) -> FollowUp {
            let mut knobs = Knobs {
                params: &mut self.params,
                fan: &mut self.fan,
                relay: &mut self.relay,
            };
            dispatch(channel, value, &mut knobs)
        }
    }

    #[test]
    fn handler_table_is_indexed_by_channel() {
        for (index, handler) in HANDLERS.iter().enumerate() {
            assert_eq!(handler.channel as usize, index, "{:?}", handler.channel);
        }
    }

    #[test]
    fn parameter_channels_refresh_the_fan() {
        let mut f = Fixture::new();
        assert_eq!(f.send(ParamChannel::StartTemp, 70), FollowUp::RefreshFan);
        assert_eq!(f.send(ParamChannel::MaxTemp, 95), FollowUp::RefreshFan);
        assert_eq!(f.send(ParamChannel::LowSpeed, 30), FollowUp::RefreshFan);
        assert_eq!(f.send(ParamChannel::Override, 1), FollowUp::RefreshFan);
        assert_eq!(f.params, LiveParameters::new(70, 95, 30, 100));
        assert!(f.fan.override_active());
    }

    #[test]
    fn inverted_updates_are_clamped_not_rejected() {
        let mut f = Fixture::new();
        f.send(ParamChannel::StartTemp, 200);
        assert_eq!(f.params.start_temp(), 90);

        f.send(ParamChannel::MaxTemp, -20);
        assert_eq!(f.params.max_temp(), 90);
        assert!(f.params.start_temp() <= f.params.max_temp());

        f.send(ParamChannel::LowSpeed, 101);
        assert_eq!(f.params.low_speed(), 100);
    }

    #[test]
    fn override_treats_any_nonzero_as_on() {
        let mut f = Fixture::new();
        f.send(ParamChannel::Override, 7);
        assert!(f.fan.override_active());
        f.send(ParamChannel::Override, 0);
        assert!(!f.fan.override_active());
    }

    #[test]
    fn relay_mutates_device_state() {
        let mut f = Fixture::new();
        assert_eq!(f.send(ParamChannel::Relay, 0), FollowUp::DriveRelay);
        assert!(!f.relay);
        f.send(ParamChannel::Relay, 1);
        assert!(f.relay);
    }
}
