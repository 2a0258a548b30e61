//! Channel registry and per-channel read loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serhub_decode::{DecoderInfo, DecoderRegistry};

use crate::config::{ChannelConfig, ManagerOptions};
use crate::error::{ChannelError, ExportError, TransportError};
use crate::event::{ChannelEvent, ChannelState};
use crate::export::{self, ExportFormat, Exported, TimeRange};
use crate::logbuf::{CaptureStore, CapturedLine};
use crate::segmenter::LineSegmenter;
use crate::send::{echo_text, encode_payload, SendMode};
use crate::transport::{
    ChunkReader, ChunkWriter, Connection, PortInfo, ReadOutcome, SerialTransport, Transport,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub config: Option<ChannelConfig>,
}

/// State shared between the registry entry and the channel's read loop.
struct ChannelShared {
    id: String,
    keep_running: AtomicBool,
    state: Mutex<ChannelState>,
    decoder: RwLock<Option<String>>,
}

impl ChannelShared {
    fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }
}

struct ChannelEntry {
    config: ChannelConfig,
    port: String,
    shared: Arc<ChannelShared>,
    writer: Arc<Mutex<Option<Box<dyn ChunkWriter>>>>,
    reader: Option<JoinHandle<()>>,
}

/// Owns every open channel.
///
/// Each connected channel gets its own read thread. The registry map is the
/// only structure shared across those threads; everything a read loop
/// mutates (pending text, decoder state) lives on its own thread.
pub struct ChannelManager {
    transport: Arc<dyn Transport>,
    decoders: Arc<DecoderRegistry>,
    options: ManagerOptions,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    captures: Arc<CaptureStore>,
    tx_evt: Sender<ChannelEvent>,
    rx_evt: Receiver<ChannelEvent>,
}

impl ChannelManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        decoders: DecoderRegistry,
        options: ManagerOptions,
    ) -> Self {
        let (tx_evt, rx_evt) = unbounded();
        Self {
            transport,
            decoders: Arc::new(decoders),
            captures: Arc::new(CaptureStore::new(options.max_captured_lines)),
            options,
            channels: Mutex::new(HashMap::new()),
            tx_evt,
            rx_evt,
        }
    }

    /// Manager over the host's native serial ports with the built-in decoders.
    pub fn serial(options: ManagerOptions) -> Self {
        let transport = SerialTransport::new(options.read_poll());
        Self::new(Arc::new(transport), DecoderRegistry::with_builtin(), options)
    }

    /// Notification stream. The receiver can be cloned for several consumers.
    pub fn events(&self) -> &Receiver<ChannelEvent> {
        &self.rx_evt
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Opens `config.port` as channel `id`, replacing any existing
    /// connection under that id.
    pub fn connect(&self, id: &str, config: ChannelConfig) -> Result<ChannelStatus, ChannelError> {
        config.validate()?;
        if let Some(name) = &config.decoder {
            if !self.decoders.contains(name) {
                return Err(ChannelError::UnknownDecoder(name.clone()));
            }
        }

        self.disconnect(id);
        self.emit_status(id, ChannelState::Connecting);

        let connection = match self.transport.open(&config) {
            Ok(c) => c,
            Err(source) => {
                warn!("[{id}] failed to open {}: {source}", config.port);
                self.emit(ChannelEvent::Error {
                    channel: id.to_string(),
                    message: source.to_string(),
                });
                self.emit_status(id, ChannelState::Disconnected);
                return Err(ChannelError::TransportOpen {
                    port: config.port.clone(),
                    source,
                });
            }
        };

        let Connection { port, reader, writer } = connection;
        let shared = Arc::new(ChannelShared {
            id: id.to_string(),
            keep_running: AtomicBool::new(true),
            state: Mutex::new(ChannelState::Connected),
            decoder: RwLock::new(config.decoder.clone()),
        });
        let entry = ChannelEntry {
            config: config.clone(),
            port: port.clone(),
            shared: shared.clone(),
            writer: Arc::new(Mutex::new(Some(writer))),
            reader: None,
        };

        // Registered before it is announced, announced before the read loop
        // can publish anything for it.
        let superseded = {
            let mut channels = self.channels.lock();
            let old = channels.insert(id.to_string(), entry);
            self.emit_status(id, ChannelState::Connected);
            old
        };
        if let Some(old) = superseded {
            // A concurrent connect for the same id registered first; this
            // one wins and the other is torn down quietly.
            warn!("[{id}] concurrent connect superseded an earlier connection");
            self.close_entry(old, false);
        }

        let read_loop = ReadLoop {
            shared: shared.clone(),
            reader,
            segmenter: LineSegmenter::new(config.encoding, self.options.overflow_chars),
            decoders: self.decoders.clone(),
            captures: self.captures.clone(),
            tx_evt: self.tx_evt.clone(),
            chunk_size: self.options.read_chunk_size.max(1),
        };
        let spawned = thread::Builder::new()
            .name(format!("serhub-rx-{id}"))
            .spawn(move || read_loop.run());

        match spawned {
            Ok(handle) => self.attach_reader(id, &shared, handle),
            Err(e) => {
                let source = TransportError::Io(e);
                self.abort_connect(id, &shared, &source);
                return Err(ChannelError::TransportOpen {
                    port: config.port.clone(),
                    source,
                });
            }
        }

        info!("[{id}] connected to {port} @ {} baud", config.baud_rate);
        Ok(ChannelStatus {
            state: ChannelState::Connected,
            config: Some(config),
        })
    }

    /// Hands the read thread to the registry entry it belongs to. If that
    /// entry was already torn down, the thread is stopped and joined here.
    fn attach_reader(&self, id: &str, shared: &Arc<ChannelShared>, handle: JoinHandle<()>) {
        let orphan = {
            let mut channels = self.channels.lock();
            match channels.get_mut(id) {
                Some(entry) if Arc::ptr_eq(&entry.shared, shared) => {
                    entry.reader = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };
        if let Some(handle) = orphan {
            shared.keep_running.store(false, Ordering::Release);
            if handle.join().is_err() {
                warn!("[{id}] read loop panicked");
            }
        }
    }

    /// Reports a connect that failed after registration and removes the
    /// channel again, unless a later connect already replaced it.
    fn abort_connect(&self, id: &str, shared: &Arc<ChannelShared>, source: &TransportError) {
        warn!("[{id}] connect aborted: {source}");
        shared.keep_running.store(false, Ordering::Release);
        self.emit_error(id, &source.to_string());

        let entry = {
            let mut channels = self.channels.lock();
            let ours = channels
                .get(id)
                .map_or(false, |entry| Arc::ptr_eq(&entry.shared, shared));
            if ours {
                channels.remove(id)
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            self.close_entry(entry, true);
        }
    }

    /// Stops the read loop, closes the port and forgets the channel.
    ///
    /// Idempotent. Returns whether a channel was registered under `id`.
    pub fn disconnect(&self, id: &str) -> bool {
        let Some(entry) = self.channels.lock().remove(id) else {
            return false;
        };
        self.close_entry(entry, true);
        true
    }

    /// Disconnects every channel opened on `port`.
    ///
    /// Matching is by the connection's hardware handle, so channel ids play
    /// no part. Returns the ids that were disconnected.
    pub fn handle_unplug(&self, port: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .channels
            .lock()
            .iter()
            .filter(|(_, entry)| entry.port == port)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            info!("[{id}] {port} was unplugged");
            self.disconnect(id);
        }
        ids
    }

    /// Encodes and writes `payload`, then records it as an outbound line.
    /// Returns the number of bytes written.
    pub fn send(&self, id: &str, payload: &str, mode: SendMode) -> Result<usize, ChannelError> {
        let writer = self.channels.lock().get(id).map(|entry| entry.writer.clone());
        let Some(writer) = writer else {
            self.emit_error(id, "Port is not writable or not connected.");
            return Err(ChannelError::NotConnected(id.to_string()));
        };

        let bytes = encode_payload(payload, mode).map_err(|e| {
            self.emit_error(id, &e.to_string());
            ChannelError::from(e)
        })?;

        {
            let mut guard = writer.lock();
            let Some(w) = guard.as_mut() else {
                self.emit_error(id, "Port is not writable or not connected.");
                return Err(ChannelError::NotConnected(id.to_string()));
            };
            if let Err(e) = w.write_all(&bytes) {
                warn!("[{id}] write failed: {e}");
                self.emit_error(id, &format!("Failed to write: {e}"));
                return Err(ChannelError::TransportWrite(e));
            }
        }

        let written = bytes.len();
        debug!("[{id}] sent {written} bytes ({mode:?})");
        let line = CapturedLine::outbound(echo_text(payload, mode), bytes);
        self.captures.push(id, line.clone());
        self.emit(ChannelEvent::Data {
            channel: id.to_string(),
            line,
        });
        Ok(written)
    }

    /// Lifecycle state and configuration. Unknown ids report `Disconnected`.
    pub fn status(&self, id: &str) -> ChannelStatus {
        match self.channels.lock().get(id) {
            Some(entry) => {
                let mut config = entry.config.clone();
                config.decoder = entry.shared.decoder.read().clone();
                ChannelStatus {
                    state: entry.shared.state(),
                    config: Some(config),
                }
            }
            None => ChannelStatus {
                state: ChannelState::Disconnected,
                config: None,
            },
        }
    }

    /// Switches the decoder of a live channel; takes effect on the next chunk.
    pub fn set_decoder(&self, id: &str, decoder: Option<&str>) -> Result<(), ChannelError> {
        if let Some(name) = decoder {
            if !self.decoders.contains(name) {
                return Err(ChannelError::UnknownDecoder(name.to_string()));
            }
        }
        let channels = self.channels.lock();
        let entry = channels
            .get(id)
            .ok_or_else(|| ChannelError::NotConnected(id.to_string()))?;
        *entry.shared.decoder.write() = decoder.map(str::to_string);
        debug!("[{id}] decoder set to {decoder:?}");
        Ok(())
    }

    /// Registered channel ids, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn decoders(&self) -> Vec<DecoderInfo> {
        self.decoders.list()
    }

    pub fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        self.transport.list_ports()
    }

    /// Copy of the channel's captured lines. Still available after the
    /// channel is disconnected.
    pub fn captured(&self, id: &str) -> Vec<CapturedLine> {
        self.captures.snapshot(id)
    }

    pub fn clear(&self, id: &str) {
        self.captures.clear(id);
    }

    /// Exports a snapshot of channel `id`'s captured lines.
    pub fn export(
        &self,
        id: &str,
        format: ExportFormat,
        filter: Option<&str>,
        range: TimeRange,
    ) -> Result<Exported, ExportError> {
        let snapshot = self.captures.snapshot(id);
        export::export(&snapshot, format, filter, range)
    }

    pub(crate) fn publish_ports(&self, ports: Vec<PortInfo>) {
        self.emit(ChannelEvent::PortsUpdated { ports });
    }

    /// Disconnects every channel.
    pub fn shutdown(&self) {
        let entries: Vec<(String, ChannelEntry)> = self.channels.lock().drain().collect();
        for (_, entry) in entries {
            self.close_entry(entry, true);
        }
    }

    fn close_entry(&self, mut entry: ChannelEntry, notify: bool) {
        let id = entry.shared.id.clone();
        if notify {
            self.emit_status(&id, ChannelState::Disconnecting);
        }
        entry.shared.set_state(ChannelState::Disconnecting);
        entry.shared.keep_running.store(false, Ordering::Release);

        if let Some(mut writer) = entry.writer.lock().take() {
            if let Err(e) = writer.close() {
                warn!("[{id}] error closing {}: {e}", entry.port);
            }
        }

        if let Some(handle) = entry.reader.take() {
            debug_assert_ne!(handle.thread().id(), thread::current().id());
            if handle.join().is_err() {
                warn!("[{id}] read loop panicked");
            }
        }

        entry.shared.set_state(ChannelState::Disconnected);
        info!("[{id}] disconnected from {}", entry.port);
        if notify {
            self.emit_status(&id, ChannelState::Disconnected);
        }
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.tx_evt.send(event);
    }

    fn emit_status(&self, id: &str, state: ChannelState) {
        self.emit(ChannelEvent::Status {
            channel: id.to_string(),
            state,
        });
    }

    fn emit_error(&self, id: &str, message: &str) {
        self.emit(ChannelEvent::Error {
            channel: id.to_string(),
            message: message.to_string(),
        });
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One channel's receive pipeline: read, decode, segment, publish.
struct ReadLoop {
    shared: Arc<ChannelShared>,
    reader: Box<dyn ChunkReader>,
    segmenter: LineSegmenter,
    decoders: Arc<DecoderRegistry>,
    captures: Arc<CaptureStore>,
    tx_evt: Sender<ChannelEvent>,
    chunk_size: usize,
}

impl ReadLoop {
    fn run(mut self) {
        let id = self.shared.id.clone();
        let mut buf = vec![0u8; self.chunk_size];
        debug!("[{id}] read loop started");

        while self.shared.keep_running() {
            match self.reader.read_chunk(&mut buf, &self.shared.keep_running) {
                Ok(ReadOutcome::Data(0)) => continue,
                Ok(ReadOutcome::Data(n)) => {
                    if !self.shared.keep_running() {
                        break;
                    }
                    self.process_chunk(&buf[..n]);
                }
                Ok(ReadOutcome::Eof) => {
                    if self.shared.keep_running() {
                        info!("[{id}] end of stream");
                        self.transition(ChannelState::Idle);
                    }
                    break;
                }
                Ok(ReadOutcome::Stopped) => break,
                Err(e) => {
                    if !self.shared.keep_running() {
                        break;
                    }
                    // No automatic restart: the channel stays registered
                    // until it is disconnected or its port is unplugged.
                    error!("[{id}] read error: {e}");
                    let _ = self.tx_evt.send(ChannelEvent::Error {
                        channel: id.clone(),
                        message: e.to_string(),
                    });
                    self.transition(ChannelState::Errored);
                    break;
                }
            }
        }
        debug!("[{id}] read loop exited");
    }

    fn process_chunk(&mut self, chunk: &[u8]) {
        let decoder = self.shared.decoder.read().clone();
        let frames = match decoder {
            Some(name) => self.decoders.dispatch(&name, chunk),
            None => Vec::new(),
        };

        for line in self.segmenter.push(chunk, frames) {
            self.captures.push(&self.shared.id, line.clone());
            let _ = self.tx_evt.send(ChannelEvent::Data {
                channel: self.shared.id.clone(),
                line,
            });
        }
    }

    fn transition(&self, state: ChannelState) {
        self.shared.set_state(state);
        let _ = self.tx_evt.send(ChannelEvent::Status {
            channel: self.shared.id.clone(),
            state,
        });
    }
}
