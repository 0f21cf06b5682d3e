//! Core types for the CAN trace decoder library
//!
//! This module defines the records the decoder consumes and the decoded messages
//! it emits. Decoded messages are created once per input record and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the decoder (seconds, as recorded by the logger)
pub type Timestamp = f64;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Maximum payload length of a classic CAN frame
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Highest standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest extended (29-bit) CAN identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Raw CAN record from a trace capture
///
/// This represents a single frame as supplied by the trace reader,
/// before any signal decoding or classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanRecord {
    /// Timestamp as recorded in the capture (monotonic within one file)
    pub timestamp: Timestamp,
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Payload bytes (0-8 for classic CAN)
    pub data: Vec<u8>,
}

impl CanRecord {
    /// Create a new record
    pub fn new(timestamp: Timestamp, can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            can_id,
            data: data.into(),
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// True if the identifier does not fit in 11 bits
    pub fn is_extended(&self) -> bool {
        self.can_id > MAX_STANDARD_ID
    }
}

/// Errors that can occur during decoding and analysis
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecoderError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid schema definition: {0}")]
    SchemaError(String),

    #[error("Byte index {index} out of range for {len}-byte payload")]
    IndexError { index: usize, len: usize },

    #[error("Trace contains no records")]
    EmptyInput,
}

/// Build a payload from integer byte values, rejecting anything outside 0..=255
///
/// Used by readers that parse bytes as wider integers before handing them over.
pub fn payload_from_values(values: &[i64]) -> Result<Vec<u8>> {
    if values.len() > MAX_PAYLOAD_LEN {
        return Err(DecoderError::InvalidInput(format!(
            "payload has {} bytes, at most {} allowed",
            values.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            u8::try_from(v).map_err(|_| {
                DecoderError::InvalidInput(format!("byte {} has value {} outside 0..=255", i, v))
            })
        })
        .collect()
}

/// Check identifier and payload shape of one input record
pub fn validate_input(can_id: u32, payload: &[u8]) -> Result<()> {
    if can_id > MAX_EXTENDED_ID {
        return Err(DecoderError::InvalidInput(format!(
            "CAN ID 0x{:X} exceeds 29 bits",
            can_id
        )));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(DecoderError::InvalidInput(format!(
            "payload of CAN ID 0x{:X} has {} bytes, at most {} allowed",
            can_id,
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    Ok(())
}

/// Format bytes as space-separated upper-case hex (e.g. "93 83 00")
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A decoded CAN message with all its signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    /// Timestamp from the capture
    pub timestamp: Timestamp,
    /// CAN message ID
    pub can_id: u32,
    /// Schema name (None for unknown-message pass-through)
    pub message_name: Option<String>,
    /// Payload exactly as received
    pub raw_payload: Vec<u8>,
    /// Decoded signals in schema field order (empty for unknown messages)
    pub signals: Vec<DecodedSignal>,
    /// Payload length differed from the schema's expected length
    pub length_mismatch: bool,
}

impl DecodedMessage {
    /// Look up a signal value by name
    pub fn signal(&self, name: &str) -> Option<&SignalValue> {
        self.signals.iter().find(|s| s.name == name).map(|s| &s.value)
    }

    /// Look up the full decoded signal by name
    pub fn decoded_signal(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// True if a schema was applied to this message
    pub fn is_known(&self) -> bool {
        self.message_name.is_some()
    }

    /// True if any enumerated signal carried a value outside its map
    pub fn has_unrecognized(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s.value, SignalValue::Unrecognized(_)))
    }

    pub fn payload_hex(&self) -> String {
        hex_string(&self.raw_payload)
    }
}

/// A decoded signal with its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedSignal {
    /// Field name from the schema
    pub name: String,
    /// Decoded value or label
    pub value: SignalValue,
    /// Raw extracted bits (None when the field lies outside the payload)
    pub raw_value: Option<u64>,
}

/// Signal value types produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignalValue {
    /// Single-bit field without an enumeration
    Boolean(bool),
    /// Multi-bit field without an enumeration
    Unsigned(u64),
    /// Enumerated field whose raw value is mapped
    Label(String),
    /// Enumerated field whose raw value has no label (bus noise, unseen hardware state)
    Unrecognized(u64),
    /// Field lies outside the received payload
    Unavailable,
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Boolean(v) => write!(f, "{}", v),
            SignalValue::Unsigned(v) => write!(f, "{}", v),
            SignalValue::Label(label) => write!(f, "{}", label),
            SignalValue::Unrecognized(v) => write!(f, "0x{:02X} (unrecognized)", v),
            SignalValue::Unavailable => write!(f, "n/a"),
        }
    }
}

impl SignalValue {
    /// Boolean view, only for single-bit fields
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Label view, only for mapped enumerated fields
    pub fn as_label(&self) -> Option<&str> {
        match self {
            SignalValue::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, SignalValue::Unavailable)
    }
}
