use serde::{Deserialize, Serialize};

use crate::error::EncodingError;

/// How an outbound payload string is turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    #[default]
    Ascii,
    Hex,
    Bin,
}

impl std::str::FromStr for SendMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" | "text" => Ok(Self::Ascii),
            "hex" => Ok(Self::Hex),
            "bin" | "binary" => Ok(Self::Bin),
            _ => Err(()),
        }
    }
}

/// Converts a user payload into the bytes to write.
///
/// - ascii: CRLF appended unless the payload already ends with a newline
/// - hex: whitespace ignored, even digit count required
/// - bin: whitespace ignored, 8-bit groups, last group right-padded with 0
pub fn encode_payload(payload: &str, mode: SendMode) -> Result<Vec<u8>, EncodingError> {
    match mode {
        SendMode::Ascii => {
            let mut bytes = payload.as_bytes().to_vec();
            if !payload.ends_with('\n') {
                bytes.extend_from_slice(b"\r\n");
            }
            Ok(bytes)
        }
        SendMode::Hex => {
            let digits = strip_whitespace(payload);
            if digits.len() % 2 != 0 {
                return Err(EncodingError::OddHexLength(digits.len()));
            }
            Ok(hex::decode(digits)?)
        }
        SendMode::Bin => {
            let digits = strip_whitespace(payload);
            if let Some(bad) = digits.chars().find(|c| !matches!(c, '0' | '1')) {
                return Err(EncodingError::InvalidBinaryDigit(bad));
            }
            Ok(digits
                .as_bytes()
                .chunks(8)
                .map(|group| {
                    group
                        .iter()
                        .chain(std::iter::repeat(&b'0'))
                        .take(8)
                        .fold(0u8, |acc, &bit| (acc << 1) | (bit - b'0'))
                })
                .collect())
        }
    }
}

/// Text recorded for an outbound line.
pub fn echo_text(payload: &str, mode: SendMode) -> String {
    match mode {
        SendMode::Ascii => payload.to_string(),
        SendMode::Hex => format!("[HEX] {payload}"),
        SendMode::Bin => format!("[BIN] {payload}"),
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
