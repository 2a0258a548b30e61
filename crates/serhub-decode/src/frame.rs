use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

/// Field name to value mapping that keeps insertion order.
///
/// Serializes as a JSON object whose keys appear in the order the decoder
/// produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameFields(Vec<(String, FieldValue)>);

impl FrameFields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, key: String, value: FieldValue) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }
}

impl Serialize for FrameFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FrameFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = FrameFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of frame fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FrameFields, A::Error> {
                let mut fields = FrameFields::new();
                while let Some((k, v)) = access.next_entry::<String, FieldValue>()? {
                    fields.insert(k, v);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// A structured result produced by a protocol decoder from raw bytes.
///
/// Fields are only settable through the builder methods while the frame is
/// being assembled; once handed out the frame is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    protocol: String,
    fields: FrameFields,
    #[serde(rename = "display")]
    summary: String,
}

impl DecodedFrame {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            fields: FrameFields::new(),
            summary: String::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn fields(&self) -> &FrameFields {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_keep_insertion_order_in_json() {
        let frame = DecodedFrame::new("TEST")
            .with_field("zeta", 1u8)
            .with_field("alpha", "x")
            .with_field("mid", true)
            .with_summary("test frame");

        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"protocol":"TEST","fields":{"zeta":1,"alpha":"x","mid":true},"display":"test frame"}"#
        );
    }

    #[test]
    fn frame_survives_json() {
        let frame = DecodedFrame::new("TEST")
            .with_field("hex", "00ff")
            .with_field("len", 2usize)
            .with_field("ok", false);

        let json = serde_json::to_string(&frame).unwrap();
        let back: DecodedFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
        assert_eq!(back.fields().iter().map(|(k, _)| k).collect::<Vec<_>>(), ["hex", "len", "ok"]);
    }

    #[test]
    fn duplicate_key_overwrites_in_place() {
        let frame = DecodedFrame::new("TEST")
            .with_field("a", 1u8)
            .with_field("b", 2u8)
            .with_field("a", 3u8);
        assert_eq!(frame.fields().len(), 2);
        assert_eq!(frame.field("a"), Some(&FieldValue::Int(3)));
    }
}
