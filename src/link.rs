// src/link.rs
//
// Connectivity supervisor. Level-triggered on the link status seen each tick;
// the outcome of a connection attempt is only ever observed that way.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    DisconnectedIdle,
    DisconnectedBackoffArmed,
}

/// Work the caller must do after feeding the supervisor a link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    /// Link just came up: re-request every live parameter.
    Resync,
    /// Link is down and no backoff timer is running: arm one.
    ArmBackoff,
}

#[derive(Debug, Default)]
pub struct LinkSupervisor {
    connected: bool,
    /// Invariant: true only while a backoff timer is registered.
    reconnect_pending: bool,
    attempts: u32,
}

impl LinkSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        if self.connected {
            LinkState::Connected
        } else if self.reconnect_pending {
            LinkState::DisconnectedBackoffArmed
        } else {
            LinkState::DisconnectedIdle
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Feeds the link status observed on this tick.
    pub fn observe(&mut self, connected: bool) -> LinkAction {
        if connected {
            let was_connected = self.connected;
            self.connected = true;
            if was_connected {
                return LinkAction::None;
            }
            self.attempts = 0;
            return LinkAction::Resync;
        }

        self.connected = false;
        if self.reconnect_pending {
            return LinkAction::None;
        }
        self.reconnect_pending = true;
        LinkAction::ArmBackoff
    }

    /// Backs out of `ArmBackoff` when no timer could be registered, so the
    /// next tick tries again.
    pub fn disarm(&mut self) {
        self.reconnect_pending = false;
    }

    /// Called when the backoff timer fires. Returns the attempt number when a
    /// connection attempt should be issued, or `None` if the link came back
    /// while the timer was running.
    pub fn backoff_expired(&mut self) -> Option<u32> {
        self.reconnect_pending = false;
        if self.connected {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }
}
