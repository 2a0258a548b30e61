//! Core functionalities: channel registry, line capture, export, transports.

pub mod config;
pub mod encoding;
pub mod error;
pub mod event;
pub mod export;
pub mod logbuf;
pub mod manager;
pub mod mock;
pub mod segmenter;
pub mod send;
pub mod transport;
pub mod watcher;

pub use config::{ChannelConfig, FlowControl, ManagerOptions, Parity};
pub use encoding::TextEncoding;
pub use error::{ChannelError, EncodingError, ExportError, TransportError};
pub use event::{ChannelEvent, ChannelState};
pub use export::{ExportFormat, Exported, TimeRange};
pub use logbuf::{CaptureStore, CapturedLine, Direction};
pub use manager::{ChannelManager, ChannelStatus};
pub use send::SendMode;
pub use transport::{PortInfo, SerialTransport, Transport};
pub use watcher::PortWatcher;

pub use serhub_decode::{DecodedFrame, DecoderRegistry, FieldValue};
