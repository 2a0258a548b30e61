//! In-memory transport for tests and demos.
//!
//! Each [`MockDevice`] stands in for one hardware port: the test pushes
//! chunks in with [`MockDevice::feed`] and inspects what the channel wrote
//! with [`MockDevice::written`].

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::transport::{ChunkReader, ChunkWriter, Connection, PortInfo, ReadOutcome, Transport};

enum MockRead {
    Data(Vec<u8>),
    Eof,
    Error(String),
}

#[derive(Default)]
struct DeviceState {
    rx: Option<Sender<MockRead>>,
    /// Bumped on every open; a writer only releases the connection it opened.
    generation: u64,
    written: Vec<u8>,
    opened: usize,
    closed: usize,
    last_config: Option<ChannelConfig>,
    open_error: Option<String>,
    write_error: Option<String>,
    close_error: Option<String>,
}

/// Test-side handle on one fake port.
#[derive(Clone)]
pub struct MockDevice {
    name: String,
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delivers one chunk to the current connection. Returns false when the
    /// port is not open.
    pub fn feed(&self, bytes: &[u8]) -> bool {
        self.send(MockRead::Data(bytes.to_vec()))
    }

    /// Ends the stream cleanly.
    pub fn end(&self) -> bool {
        self.send(MockRead::Eof)
    }

    /// Makes the pending read fail.
    pub fn fail_read(&self, message: &str) -> bool {
        self.send(MockRead::Error(message.to_string()))
    }

    pub fn fail_open(&self, message: Option<&str>) {
        self.state.lock().open_error = message.map(str::to_string);
    }

    pub fn fail_writes(&self, message: Option<&str>) {
        self.state.lock().write_error = message.map(str::to_string);
    }

    pub fn fail_close(&self, message: Option<&str>) {
        self.state.lock().close_error = message.map(str::to_string);
    }

    /// Everything written to this port, across connections.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().rx.is_some()
    }

    /// Configuration passed to the most recent open.
    pub fn last_config(&self) -> Option<ChannelConfig> {
        self.state.lock().last_config.clone()
    }

    fn send(&self, msg: MockRead) -> bool {
        match &self.state.lock().rx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

/// A [`Transport`] over a set of named [`MockDevice`]s.
#[derive(Clone)]
pub struct MockTransport {
    devices: Arc<Mutex<BTreeMap<String, MockDevice>>>,
    poll_interval: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(Mutex::new(BTreeMap::new())),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Plugs in a device. Re-adding an existing name returns the same device.
    pub fn add_device(&self, name: &str) -> MockDevice {
        self.devices
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| MockDevice {
                name: name.to_string(),
                state: Arc::new(Mutex::new(DeviceState::default())),
            })
            .clone()
    }

    /// Unplugs a device: it disappears from `list_ports`. An open
    /// connection keeps its handles until the channel is disconnected.
    pub fn remove_device(&self, name: &str) -> Option<MockDevice> {
        self.devices.lock().remove(name)
    }
}

impl Transport for MockTransport {
    fn open(&self, config: &ChannelConfig) -> Result<Connection, TransportError> {
        let device = self
            .devices
            .lock()
            .get(&config.port)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(config.port.clone()))?;

        let mut state = device.state.lock();
        if let Some(message) = &state.open_error {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, message.clone()).into());
        }
        let (tx, rx) = unbounded();
        state.rx = Some(tx);
        state.generation += 1;
        state.opened += 1;
        let generation = state.generation;
        state.last_config = Some(config.clone());
        drop(state);

        Ok(Connection {
            port: config.port.clone(),
            reader: Box::new(MockReader {
                rx,
                pending: Vec::new(),
                poll_interval: self.poll_interval,
            }),
            writer: Box::new(MockWriter {
                state: device.state.clone(),
                generation,
                open: AtomicBool::new(true),
            }),
        })
    }

    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(self
            .devices
            .lock()
            .keys()
            .map(|name| PortInfo {
                port_name: name.clone(),
                port_type: "Virtual".to_string(),
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            })
            .collect())
    }
}

struct MockReader {
    rx: Receiver<MockRead>,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl MockReader {
    fn take_into(&mut self, data: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.pending = data[n..].to_vec();
        n
    }
}

impl ChunkReader for MockReader {
    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        keep_running: &AtomicBool,
    ) -> Result<ReadOutcome, TransportError> {
        if !self.pending.is_empty() {
            let data = std::mem::take(&mut self.pending);
            return Ok(ReadOutcome::Data(self.take_into(data, buf)));
        }
        loop {
            if !keep_running.load(Ordering::Acquire) {
                return Ok(ReadOutcome::Stopped);
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(MockRead::Data(data)) => return Ok(ReadOutcome::Data(self.take_into(data, buf))),
                Ok(MockRead::Eof) | Err(RecvTimeoutError::Disconnected) => {
                    return Ok(ReadOutcome::Eof)
                }
                Ok(MockRead::Error(message)) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, message).into());
                }
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}

struct MockWriter {
    state: Arc<Mutex<DeviceState>>,
    generation: u64,
    open: AtomicBool,
}

impl ChunkWriter for MockWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port is closed").into());
        }
        let mut state = self.state.lock();
        if let Some(message) = &state.write_error {
            return Err(io::Error::new(io::ErrorKind::Other, message.clone()).into());
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        let mut state = self.state.lock();
        if state.generation == self.generation {
            state.rx = None;
        }
        state.closed += 1;
        match &state.close_error {
            Some(message) => Err(io::Error::new(io::ErrorKind::Other, message.clone()).into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fed_chunks_in_order() {
        let transport = MockTransport::new();
        let device = transport.add_device("mock0");
        let mut conn = transport.open(&ChannelConfig::new("mock0")).unwrap();
        let run = AtomicBool::new(true);

        assert!(device.feed(b"abc"));
        assert!(device.feed(b"de"));
        let mut buf = [0u8; 16];
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Data(2));
        assert_eq!(&buf[..2], b"de");
    }

    #[test]
    fn oversized_chunk_is_split_across_reads() {
        let transport = MockTransport::new();
        let device = transport.add_device("mock0");
        let mut conn = transport.open(&ChannelConfig::new("mock0")).unwrap();
        let run = AtomicBool::new(true);

        device.feed(b"0123456789");
        let mut buf = [0u8; 4];
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Data(4));
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Data(4));
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Data(2));
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn cleared_flag_stops_a_blocked_read() {
        let transport = MockTransport::new();
        transport.add_device("mock0");
        let mut conn = transport.open(&ChannelConfig::new("mock0")).unwrap();
        let run = AtomicBool::new(false);
        let mut buf = [0u8; 4];
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Stopped);
    }

    #[test]
    fn eof_and_errors() {
        let transport = MockTransport::new();
        let device = transport.add_device("mock0");
        let mut conn = transport.open(&ChannelConfig::new("mock0")).unwrap();
        let run = AtomicBool::new(true);
        let mut buf = [0u8; 4];

        device.fail_read("unplugged");
        assert!(conn.reader.read_chunk(&mut buf, &run).is_err());
        device.end();
        assert_eq!(conn.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn writes_are_recorded_until_close() {
        let transport = MockTransport::new();
        let device = transport.add_device("mock0");
        let mut conn = transport.open(&ChannelConfig::new("mock0")).unwrap();

        conn.writer.write_all(b"AT\r\n").unwrap();
        assert_eq!(device.written(), b"AT\r\n");
        conn.writer.close().unwrap();
        assert!(conn.writer.write_all(b"x").is_err());
        assert_eq!(device.close_count(), 1);
        assert!(!device.is_open());
    }

    #[test]
    fn closing_a_stale_connection_keeps_the_newer_one() {
        let transport = MockTransport::new();
        let device = transport.add_device("mock0");
        let mut first = transport.open(&ChannelConfig::new("mock0")).unwrap();
        let mut second = transport.open(&ChannelConfig::new("mock0")).unwrap();
        let run = AtomicBool::new(true);

        first.writer.close().unwrap();
        assert!(device.is_open());
        assert!(device.feed(b"still"));
        let mut buf = [0u8; 8];
        assert_eq!(second.reader.read_chunk(&mut buf, &run).unwrap(), ReadOutcome::Data(5));
        assert_eq!(&buf[..5], b"still");

        second.writer.close().unwrap();
        assert!(!device.is_open());
        assert_eq!(device.close_count(), 2);
    }

    #[test]
    fn unknown_port_and_forced_open_failure() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.open(&ChannelConfig::new("nope")),
            Err(TransportError::NotFound(_))
        ));
        let device = transport.add_device("mock0");
        device.fail_open(Some("busy"));
        assert!(transport.open(&ChannelConfig::new("mock0")).is_err());
        assert_eq!(device.open_count(), 0);
    }
}
