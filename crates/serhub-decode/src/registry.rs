use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::{DecodeError, DecodedFrame, Decoder, ModbusRtuDecoder, SlipDecoder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecoderInfo {
    pub name: String,
    pub description: String,
}

/// Name to decoder lookup consulted on every received chunk.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the SLIP and Modbus RTU decoders.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SlipDecoder);
        registry.register(ModbusRtuDecoder);
        registry
    }

    /// Adds a decoder, replacing any existing one with the same name.
    pub fn register<D: Decoder + 'static>(&mut self, decoder: D) {
        let name = decoder.name().to_string();
        if self.decoders.insert(name.clone(), Arc::new(decoder)).is_some() {
            debug!("decoder '{name}' replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Decoder>> {
        self.decoders.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Registered decoders sorted by name.
    pub fn list(&self) -> Vec<DecoderInfo> {
        let mut infos: Vec<DecoderInfo> = self
            .decoders
            .values()
            .map(|d| DecoderInfo {
                name: d.name().to_string(),
                description: d.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Runs the named decoder over one chunk.
    ///
    /// Never fails: an unknown name, a decoder error or a decoder panic all
    /// yield an empty list so the chunk still reaches the line segmenter.
    pub fn dispatch(&self, name: &str, chunk: &[u8]) -> Vec<DecodedFrame> {
        let Some(decoder) = self.decoders.get(name) else {
            warn!("decoder '{name}' is not registered");
            return Vec::new();
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| decoder.process_rx(chunk)))
            .unwrap_or_else(|payload| Err(DecodeError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(frames) => frames,
            Err(e) => {
                warn!("decoder '{name}' failed on {} byte chunk: {e}", chunk.len());
                Vec::new()
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Decoder for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn description(&self) -> &'static str {
            "always errors"
        }

        fn decode(&self, _bytes: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
            Err(DecodeError::Malformed {
                decoder: "Failing",
                message: "bad input".into(),
            })
        }
    }

    struct Panicking;

    impl Decoder for Panicking {
        fn name(&self) -> &'static str {
            "Panicking"
        }

        fn description(&self) -> &'static str {
            "always panics"
        }

        fn decode(&self, _bytes: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
            panic!("boom")
        }
    }

    struct Pair;

    impl Decoder for Pair {
        fn name(&self) -> &'static str {
            "Pair"
        }

        fn description(&self) -> &'static str {
            "two frames per chunk"
        }

        fn decode(&self, _bytes: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
            Ok(Some(DecodedFrame::new("Pair")))
        }

        fn process_rx(&self, bytes: &[u8]) -> Result<Vec<DecodedFrame>, DecodeError> {
            let one = self.decode(bytes)?.into_iter();
            Ok(one.clone().chain(one).collect())
        }
    }

    #[test]
    fn builtin_decoders_are_listed() {
        let registry = DecoderRegistry::with_builtin();
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["Modbus RTU", "SLIP"]);
        assert!(registry.contains("SLIP"));
    }

    #[test]
    fn dispatch_uses_default_process_rx() {
        let registry = DecoderRegistry::with_builtin();
        let frames = registry.dispatch("SLIP", &[0xC0, 0x41, 0xC0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].protocol(), "SLIP");

        assert!(registry.dispatch("SLIP", b"plain text").is_empty());
    }

    #[test]
    fn dispatch_honours_custom_process_rx() {
        let mut registry = DecoderRegistry::new();
        registry.register(Pair);
        assert_eq!(registry.dispatch("Pair", b"x").len(), 2);
    }

    #[test]
    fn failing_decoder_degrades_to_no_frames() {
        let mut registry = DecoderRegistry::new();
        registry.register(Failing);
        assert!(registry.dispatch("Failing", b"abc").is_empty());
    }

    #[test]
    fn panicking_decoder_degrades_to_no_frames() {
        let mut registry = DecoderRegistry::new();
        registry.register(Panicking);
        assert!(registry.dispatch("Panicking", b"abc").is_empty());
    }

    #[test]
    fn unknown_decoder_yields_nothing() {
        let registry = DecoderRegistry::with_builtin();
        assert!(registry.dispatch("NMEA", b"$GPGGA").is_empty());
    }
}
