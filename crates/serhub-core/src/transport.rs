//! Transport seam between the channel manager and the hardware.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serialport::{SerialPort, SerialPortInfo};

use crate::config::{ChannelConfig, FlowControl, Parity};
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, serial_number, manufacturer, product) = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.serial_number,
                usb.manufacturer,
                usb.product,
            ),
            serialport::SerialPortType::PciPort => bare("PCI"),
            serialport::SerialPortType::BluetoothPort => bare("Bluetooth"),
            serialport::SerialPortType::Unknown => bare("Unknown"),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            serial_number,
            manufacturer,
            product,
        }
    }
}

/// Result of one blocking chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written to the front of the buffer. May be zero.
    Data(usize),
    /// The stream ended cleanly.
    Eof,
    /// The keep-running flag was cleared while waiting.
    Stopped,
}

pub trait ChunkReader: Send {
    /// Blocks until data arrives, the stream ends, or `keep_running` turns false.
    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        keep_running: &AtomicBool,
    ) -> Result<ReadOutcome, TransportError>;
}

pub trait ChunkWriter: Send {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Releases the write side. Further writes fail.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// An opened link: independent read and write halves of one hardware port.
pub struct Connection {
    /// Identity of the underlying hardware handle. Unplug notifications
    /// are matched against this, never against the channel id.
    pub port: String,
    pub reader: Box<dyn ChunkReader>,
    pub writer: Box<dyn ChunkWriter>,
}

pub trait Transport: Send + Sync {
    fn open(&self, config: &ChannelConfig) -> Result<Connection, TransportError>;

    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError>;
}

/// Native serial ports through the `serialport` crate.
pub struct SerialTransport {
    poll_interval: Duration,
}

impl SerialTransport {
    /// `poll_interval` bounds how long a blocked read waits before it
    /// re-checks the keep-running flag.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Transport for SerialTransport {
    fn open(&self, config: &ChannelConfig) -> Result<Connection, TransportError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits(config.data_bits)?)
            .parity(parity(config.parity))
            .stop_bits(stop_bits(config.stop_bits)?)
            .flow_control(flow_control(config.flow_control))
            .timeout(self.poll_interval)
            .open()?;
        let writer = port.try_clone()?;

        Ok(Connection {
            port: config.port.clone(),
            reader: Box::new(SerialReader { port }),
            writer: Box::new(SerialWriter { port: Some(writer) }),
        })
    }

    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect())
    }
}

struct SerialReader {
    port: Box<dyn SerialPort>,
}

impl ChunkReader for SerialReader {
    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        keep_running: &AtomicBool,
    ) -> Result<ReadOutcome, TransportError> {
        loop {
            if !keep_running.load(Ordering::Acquire) {
                return Ok(ReadOutcome::Stopped);
            }
            match self.port.read(buf) {
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Eof),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

struct SerialWriter {
    port: Option<Box<dyn SerialPort>>,
}

impl ChunkWriter for SerialWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is closed"))?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.port.take() {
            Some(mut port) => Ok(port.flush()?),
            None => Ok(()),
        }
    }
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted)
}

type PortDetails = (
    String,
    Option<u16>,
    Option<u16>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn bare(port_type: &str) -> PortDetails {
    (port_type.to_string(), None, None, None, None, None)
}

fn data_bits(bits: u8) -> Result<serialport::DataBits, TransportError> {
    Ok(match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => return Err(invalid_setting(format!("unsupported data bits: {other}"))),
    })
}

fn stop_bits(bits: u8) -> Result<serialport::StopBits, TransportError> {
    Ok(match bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => return Err(invalid_setting(format!("unsupported stop bits: {other}"))),
    })
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
        FlowControl::Software => serialport::FlowControl::Software,
    }
}

fn invalid_setting(message: String) -> TransportError {
    serialport::Error::new(serialport::ErrorKind::InvalidInput, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_line_settings() {
        assert_eq!(data_bits(7).unwrap(), serialport::DataBits::Seven);
        assert!(data_bits(9).is_err());
        assert_eq!(stop_bits(2).unwrap(), serialport::StopBits::Two);
        assert!(stop_bits(0).is_err());
        assert_eq!(parity(Parity::Odd), serialport::Parity::Odd);
        assert_eq!(flow_control(FlowControl::Hardware), serialport::FlowControl::Hardware);
    }

    #[test]
    fn non_usb_ports_carry_only_a_type() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: serialport::SerialPortType::PciPort,
        };
        let port = PortInfo::from(info);
        assert_eq!(port.port_type, "PCI");
        assert_eq!(port.vid, None);
        assert_eq!(port.manufacturer, None);
    }

    #[test]
    fn opening_a_missing_port_fails() {
        let transport = SerialTransport::default();
        let cfg = ChannelConfig::new("/dev/serhub-does-not-exist");
        assert!(transport.open(&cfg).is_err());
    }
}
