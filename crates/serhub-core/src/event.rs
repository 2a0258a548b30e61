use std::fmt;

use serde::Serialize;

use crate::logbuf::CapturedLine;
use crate::transport::PortInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Registered, but the read loop ended on a clean end-of-stream.
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    /// Registered, but the read loop stopped on a read error.
    Errored,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Disconnecting => "disconnecting",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Errored => "errored",
        })
    }
}

/// Notifications published by the channel manager.
///
/// Events for one channel arrive in the order they happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelEvent {
    /// A captured line, inbound or outbound. Decoded frames ride on the line.
    Data { channel: String, line: CapturedLine },
    Status { channel: String, state: ChannelState },
    Error { channel: String, message: String },
    PortsUpdated { ports: Vec<PortInfo> },
}

impl ChannelEvent {
    pub fn channel(&self) -> Option<&str> {
        match self {
            ChannelEvent::Data { channel, .. }
            | ChannelEvent::Status { channel, .. }
            | ChannelEvent::Error { channel, .. } => Some(channel),
            ChannelEvent::PortsUpdated { .. } => None,
        }
    }
}
