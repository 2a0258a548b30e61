use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::TextEncoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
    Software,
}

/// Per-channel connection settings.
///
/// Every field has a default, so a host can deserialize a partial object
/// such as `{"port": "/dev/ttyUSB0", "decoder": "SLIP"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Name of the decoder run over every received chunk.
    pub decoder: Option<String>,
    pub encoding: TextEncoding,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
            decoder: None,
            encoding: TextEncoding::Utf8,
        }
    }
}

impl ChannelConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    pub fn with_decoder(mut self, decoder: impl Into<String>) -> Self {
        self.decoder = Some(decoder.into());
        self
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.port.is_empty() {
            return Err(ChannelError::InvalidConfig("port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(ChannelError::InvalidConfig("baud rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ChannelError::InvalidConfig(format!(
                "data bits must be 5, 6, 7 or 8 (got {})",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ChannelError::InvalidConfig(format!(
                "stop bits must be 1 or 2 (got {})",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerOptions {
    /// Captured lines kept per channel before the oldest are dropped.
    pub max_captured_lines: usize,
    /// Pending text longer than this without a newline is flushed as one line.
    pub overflow_chars: usize,
    pub read_chunk_size: usize,
    /// How often a blocked read wakes up to check for cancellation.
    pub read_poll_ms: u64,
    pub port_scan_interval_ms: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_captured_lines: 10_000,
            overflow_chars: 5000,
            read_chunk_size: 4096,
            read_poll_ms: 50,
            port_scan_interval_ms: 1000,
        }
    }
}

impl ManagerOptions {
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms.max(1))
    }

    pub fn port_scan_interval(&self) -> Duration {
        Duration::from_millis(self.port_scan_interval_ms.max(1))
    }
}
