use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("port '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Malformed hex or binary send payload.
#[derive(Debug, Error, PartialEq)]
pub enum EncodingError {
    #[error("invalid HEX string (odd number of characters: {0})")]
    OddHexLength(usize),
    #[error("invalid HEX string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid binary digit '{0}'")]
    InvalidBinaryDigit(char),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown decoder '{0}'")]
    UnknownDecoder(String),
    #[error("failed to open {port}: {source}")]
    TransportOpen {
        port: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to write: {0}")]
    TransportWrite(#[source] TransportError),
    #[error("channel '{0}' is not connected")]
    NotConnected(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid regex filter: {0}")]
    FilterSyntax(#[from] regex::Error),
    #[error("unknown export format '{0}'")]
    UnknownFormat(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
