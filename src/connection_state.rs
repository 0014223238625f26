use serde::{Deserialize, Serialize};

/// Lifecycle states of the telemetry stream connection.
///
/// `Stopped` is terminal and only ever entered through an explicit
/// shutdown request; every other state can be revisited indefinitely.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

impl ConnectionState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, ConnectionState::Stopped)
    }
}
