use encoding_rs::{CoderResult, Encoding, GBK, UTF_16LE, UTF_8};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    Auto,
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    #[serde(alias = "utf-16")]
    Utf16,
    Ascii,
    Gbk,
    Gb2312,
}

impl std::str::FromStr for TextEncoding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Self::Utf8,
            "UTF-16" | "UTF16" => Self::Utf16,
            "ASCII" => Self::Ascii,
            "GBK" => Self::Gbk,
            "GB2312" => Self::Gb2312,
            "AUTO" => Self::Auto,
            _ => return Err(()),
        })
    }
}

impl TextEncoding {
    /// Decodes a complete byte run. Never fails; bad sequences become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Auto => detect_and_decode(bytes),
            Self::Ascii => bytes.iter().map(|&b| if b < 128 { b as char } else { '?' }).collect(),
            Self::Utf8 => UTF_8.decode_without_bom_handling(bytes).0.into_owned(),
            Self::Utf16 => UTF_16LE.decode_without_bom_handling(bytes).0.into_owned(),
            Self::Gbk | Self::Gb2312 => GBK.decode_without_bom_handling(bytes).0.into_owned(),
        }
    }

    fn stream_encoding(&self) -> Option<&'static Encoding> {
        match self {
            Self::Utf8 => Some(UTF_8),
            Self::Utf16 => Some(UTF_16LE),
            Self::Gbk | Self::Gb2312 => Some(GBK),
            Self::Auto | Self::Ascii => None,
        }
    }
}

fn detect_and_decode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    encoding.decode(bytes).0.into_owned()
}

/// Chunk-by-chunk text decoder for one channel.
///
/// Multi-byte encodings keep a streaming decoder so a character split across
/// two reads is still decoded correctly. ASCII and auto-detection decode each
/// chunk on its own.
pub struct StreamDecoder {
    encoding: TextEncoding,
    stream: Option<encoding_rs::Decoder>,
}

impl StreamDecoder {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            stream: encoding.stream_encoding().map(Encoding::new_decoder_with_bom_removal),
        }
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let Some(decoder) = self.stream.as_mut() else {
            return self.encoding.decode(bytes);
        };

        let mut out = String::new();
        let mut input = bytes;
        loop {
            let needed = decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len().saturating_mul(3).saturating_add(16));
            out.reserve(needed);
            let (result, read, _had_replacements) =
                decoder.decode_to_string(input, &mut out, false);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
        out
    }
}
