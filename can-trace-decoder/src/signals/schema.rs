//! Declarative signal schemas
//!
//! A schema lists the named bitfields of one CAN message. Schemas are
//! validated when they are constructed, so a misconfigured field is reported
//! at startup instead of at decode time.

use crate::bitfield;
use crate::types::{DecoderError, Result, SignalValue, MAX_EXTENDED_ID, MAX_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Location and interpretation of one signal inside a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitFieldSpec {
    /// Signal name
    pub name: String,
    /// Byte holding the field
    pub byte_index: usize,
    /// Lowest bit of the field within the byte (bit 0 = LSB)
    #[serde(default)]
    pub bit_offset: u8,
    /// Number of bits
    pub bit_width: u8,
    /// Raw value -> semantic label
    #[serde(
        default,
        with = "enum_entries",
        skip_serializing_if = "Option::is_none"
    )]
    pub enum_map: Option<BTreeMap<u64, String>>,
}

impl BitFieldSpec {
    pub fn new(name: impl Into<String>, byte_index: usize, bit_offset: u8, bit_width: u8) -> Self {
        Self {
            name: name.into(),
            byte_index,
            bit_offset,
            bit_width,
            enum_map: None,
        }
    }

    /// Single-bit flag
    pub fn flag(name: impl Into<String>, byte_index: usize, bit_index: u8) -> Self {
        Self::new(name, byte_index, bit_index, 1)
    }

    /// Field spanning a whole byte
    pub fn byte(name: impl Into<String>, byte_index: usize) -> Self {
        Self::new(name, byte_index, 0, bitfield::BITS_PER_BYTE)
    }

    /// Builder method: attach an enumeration
    pub fn with_enum<'a>(mut self, entries: impl IntoIterator<Item = (u64, &'a str)>) -> Self {
        self.enum_map = Some(
            entries
                .into_iter()
                .map(|(raw, label)| (raw, label.to_string()))
                .collect(),
        );
        self
    }

    pub fn is_enumerated(&self) -> bool {
        self.enum_map.is_some()
    }

    /// Look up the label of a raw value
    pub fn label_for(&self, raw: u64) -> Option<&str> {
        self.enum_map
            .as_ref()
            .and_then(|map| map.get(&raw))
            .map(String::as_str)
    }

    /// True if `label` is one of this field's enumeration labels
    pub fn has_label(&self, label: &str) -> bool {
        self.enum_map
            .as_ref()
            .map(|map| map.values().any(|l| l == label))
            .unwrap_or(false)
    }

    /// Check the field against the payload length contract of its schema
    pub fn validate(&self, expected_length: usize) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DecoderError::SchemaError(
                "field name must not be empty".to_string(),
            ));
        }

        bitfield::validate_layout(self.bit_offset, self.bit_width)
            .map_err(|e| with_context(e, &format!("field '{}'", self.name)))?;

        if self.byte_index >= expected_length {
            return Err(DecoderError::SchemaError(format!(
                "field '{}' reads byte {} but the message is {} bytes long",
                self.name, self.byte_index, expected_length
            )));
        }

        if let Some(map) = &self.enum_map {
            let max = bitfield::max_value(self.bit_width);
            if let Some((raw, _)) = map.iter().find(|(raw, _)| **raw > max) {
                return Err(DecoderError::SchemaError(format!(
                    "field '{}' maps raw value {} which does not fit in {} bits",
                    self.name, raw, self.bit_width
                )));
            }
        }

        Ok(())
    }

    /// Interpret an extracted raw value
    pub fn interpret(&self, raw: u64) -> SignalValue {
        match &self.enum_map {
            Some(map) => match map.get(&raw) {
                Some(label) => SignalValue::Label(label.clone()),
                None => SignalValue::Unrecognized(raw),
            },
            None if self.bit_width == 1 => SignalValue::Boolean(raw != 0),
            None => SignalValue::Unsigned(raw),
        }
    }
}

/// Prefix a schema error message with the element it belongs to
fn with_context(err: DecoderError, context: &str) -> DecoderError {
    match err {
        DecoderError::SchemaError(msg) => {
            DecoderError::SchemaError(format!("{}: {}", context, msg))
        }
        other => other,
    }
}

/// Serialized form of a schema (used for configuration files)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub can_id: u32,
    pub name: String,
    pub expected_length: usize,
    pub fields: Vec<BitFieldSpec>,
}

/// Validated signal layout of one CAN message
///
/// Immutable once constructed: all fields are private and only read through
/// accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDefinition", into = "SchemaDefinition")]
pub struct SignalSchema {
    can_id: u32,
    name: String,
    expected_length: usize,
    fields: Vec<BitFieldSpec>,
}

impl SignalSchema {
    /// Build and validate a schema
    ///
    /// # Errors
    /// `SchemaError` if the identifier or length is out of range, a field
    /// violates its layout invariants, or two fields share a name.
    pub fn new(
        can_id: u32,
        name: impl Into<String>,
        expected_length: usize,
        fields: Vec<BitFieldSpec>,
    ) -> Result<Self> {
        let name = name.into();

        if can_id > MAX_EXTENDED_ID {
            return Err(DecoderError::SchemaError(format!(
                "schema '{}': CAN ID 0x{:X} exceeds 29 bits",
                name, can_id
            )));
        }
        if expected_length > MAX_PAYLOAD_LEN {
            return Err(DecoderError::SchemaError(format!(
                "schema '{}': expected length {} exceeds {} bytes",
                name, expected_length, MAX_PAYLOAD_LEN
            )));
        }

        let mut seen = HashSet::new();
        for field in &fields {
            field
                .validate(expected_length)
                .map_err(|e| with_context(e, &format!("schema '{}'", name)))?;
            if !seen.insert(field.name.as_str()) {
                return Err(DecoderError::SchemaError(format!(
                    "schema '{}': duplicate field '{}'",
                    name, field.name
                )));
            }
        }

        Ok(Self {
            can_id,
            name,
            expected_length,
            fields,
        })
    }

    pub fn can_id(&self) -> u32 {
        self.can_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected_length(&self) -> usize {
        self.expected_length
    }

    pub fn fields(&self) -> &[BitFieldSpec] {
        &self.fields
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&BitFieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl TryFrom<SchemaDefinition> for SignalSchema {
    type Error = DecoderError;

    fn try_from(def: SchemaDefinition) -> Result<Self> {
        SignalSchema::new(def.can_id, def.name, def.expected_length, def.fields)
    }
}

impl From<SignalSchema> for SchemaDefinition {
    fn from(schema: SignalSchema) -> Self {
        Self {
            can_id: schema.can_id,
            name: schema.name,
            expected_length: schema.expected_length,
            fields: schema.fields,
        }
    }
}

/// Enumerations are written as `[{ raw = 0, label = "none" }, ...]` because
/// TOML tables only allow string keys.
mod enum_entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        raw: u64,
        label: String,
    }

    pub fn serialize<S>(
        map: &Option<BTreeMap<u64, String>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match map {
            Some(map) => {
                let entries: Vec<Entry> = map
                    .iter()
                    .map(|(raw, label)| Entry {
                        raw: *raw,
                        label: label.clone(),
                    })
                    .collect();
                serializer.serialize_some(&entries)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> std::result::Result<Option<BTreeMap<u64, String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Option<Vec<Entry>> = Option::deserialize(deserializer)?;
        Ok(entries.map(|entries| entries.into_iter().map(|e| (e.raw, e.label)).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_field() -> BitFieldSpec {
        BitFieldSpec::byte("status", 1).with_enum([(0x00, "off"), (0x01, "on")])
    }

    #[test]
    fn test_valid_schema() {
        let schema = SignalSchema::new(
            0x200,
            "Status",
            2,
            vec![BitFieldSpec::flag("active", 0, 7), status_field()],
        )
        .unwrap();

        assert_eq!(schema.can_id(), 0x200);
        assert_eq!(schema.expected_length(), 2);
        assert_eq!(schema.fields().len(), 2);
        assert!(schema.field("status").unwrap().is_enumerated());
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn test_field_crossing_byte_boundary_rejected() {
        let err = SignalSchema::new(0x200, "Bad", 8, vec![BitFieldSpec::new("wide", 0, 6, 4)])
            .unwrap_err();
        assert!(matches!(err, DecoderError::SchemaError(_)));
    }

    #[test]
    fn test_field_outside_expected_length_rejected() {
        let err = SignalSchema::new(0x200, "Short", 2, vec![BitFieldSpec::byte("late", 2)])
            .unwrap_err();
        assert!(matches!(err, DecoderError::SchemaError(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = SignalSchema::new(
            0x200,
            "Dup",
            8,
            vec![BitFieldSpec::flag("a", 0, 0), BitFieldSpec::flag("a", 0, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, DecoderError::SchemaError(_)));
    }

    #[test]
    fn test_enum_value_wider_than_field_rejected() {
        let field = BitFieldSpec::new("mode", 0, 0, 2).with_enum([(4, "four")]);
        assert!(matches!(field.validate(8), Err(DecoderError::SchemaError(_))));
    }

    #[test]
    fn test_oversized_length_rejected() {
        assert!(SignalSchema::new(0x200, "FD", 12, vec![]).is_err());
    }

    #[test]
    fn test_interpret() {
        let flag = BitFieldSpec::flag("active", 0, 7);
        assert_eq!(flag.interpret(1), SignalValue::Boolean(true));

        let index = BitFieldSpec::new("index", 0, 0, 2);
        assert_eq!(index.interpret(3), SignalValue::Unsigned(3));

        let status = status_field();
        assert_eq!(status.interpret(1), SignalValue::Label("on".to_string()));
        assert_eq!(status.interpret(7), SignalValue::Unrecognized(7));
        assert!(status.has_label("off"));
        assert_eq!(status.label_for(0), Some("off"));
    }

    #[test]
    fn test_schema_deserialization_validates() {
        let json = r#"{
            "can_id": 512,
            "name": "Status",
            "expected_length": 2,
            "fields": [
                { "name": "status", "byte_index": 1, "bit_width": 8,
                  "enum_map": [ { "raw": 0, "label": "off" } ] }
            ]
        }"#;
        let schema: SignalSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.field("status").unwrap().label_for(0), Some("off"));

        let bad = r#"{ "can_id": 512, "name": "Bad", "expected_length": 1,
                       "fields": [ { "name": "x", "byte_index": 3, "bit_width": 8 } ] }"#;
        assert!(serde_json::from_str::<SignalSchema>(bad).is_err());
    }
}
