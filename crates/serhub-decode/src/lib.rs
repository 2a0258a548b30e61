//! Protocol decoders for raw serial byte chunks.
//!
//! Every decoder looks at exactly one chunk as delivered by the transport.
//! Frames that straddle two chunks are not reassembled.

pub mod frame;
pub mod modbus;
pub mod registry;
pub mod slip;

pub use frame::{DecodedFrame, FieldValue, FrameFields};
pub use modbus::ModbusRtuDecoder;
pub use registry::{DecoderInfo, DecoderRegistry};
pub use slip::SlipDecoder;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{decoder}: {message}")]
    Malformed { decoder: &'static str, message: String },
    #[error("decoder panicked: {0}")]
    Panicked(String),
}

/// A protocol decoder plugin.
///
/// Implementations must be pure: the same chunk always yields the same
/// frames, and no state carries over between calls.
pub trait Decoder: Send + Sync {
    /// Registry key, e.g. `"SLIP"`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Decodes at most one frame from `bytes`.
    fn decode(&self, bytes: &[u8]) -> Result<Option<DecodedFrame>, DecodeError>;

    /// Decodes every frame in a received chunk.
    fn process_rx(&self, bytes: &[u8]) -> Result<Vec<DecodedFrame>, DecodeError> {
        Ok(self.decode(bytes)?.into_iter().collect())
    }
}

/// Lowercase hex with no separators.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
