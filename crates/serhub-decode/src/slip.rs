//! SLIP (RFC 1055) frame decoder.

use crate::{to_hex, DecodeError, DecodedFrame, Decoder};

// RFC 1055 constants
pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// Decodes the first SLIP frame found in a chunk.
///
/// The body runs from the first END to the next END, or to the end of the
/// chunk when no closing END arrived in the same read.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlipDecoder;

impl Decoder for SlipDecoder {
    fn name(&self) -> &'static str {
        "SLIP"
    }

    fn description(&self) -> &'static str {
        "Decodes SLIP (Serial Line Internet Protocol, RFC 1055) frames"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
        let Some(start) = bytes.iter().position(|&b| b == END) else {
            return Ok(None);
        };
        let rest = &bytes[start + 1..];
        let encoded = match rest.iter().position(|&b| b == END) {
            Some(end) => &rest[..end],
            None => rest,
        };
        if encoded.is_empty() {
            return Ok(None);
        }

        let decoded = unescape(encoded);
        let escaped = encoded.len() - decoded.len();

        Ok(Some(
            DecodedFrame::new("SLIP")
                .with_field("encodedLength", encoded.len())
                .with_field("decodedLength", decoded.len())
                .with_field("decodedHex", to_hex(&decoded))
                .with_field("decodedAscii", printable_ascii(&decoded))
                .with_field("escapedBytes", escaped)
                .with_summary(format!(
                    "[SLIP] {} bytes decoded ({} encoded)",
                    decoded.len(),
                    encoded.len()
                )),
        ))
    }
}

/// Reverses SLIP byte stuffing.
///
/// Unknown escape sequences pass the second byte through; a trailing ESC
/// with nothing after it is dropped.
pub fn unescape(encoded: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut iter = encoded.iter().copied();
    while let Some(byte) = iter.next() {
        if byte != ESC {
            out.push(byte);
            continue;
        }
        match iter.next() {
            Some(ESC_END) => out.push(END),
            Some(ESC_ESC) => out.push(ESC),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// Wraps `data` in END markers with END and ESC bytes escaped.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(END);
    for &b in data {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            other => out.push(other),
        }
    }
    out.push(END);
    out
}

fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '.' })
        .collect()
}
