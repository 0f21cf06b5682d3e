//! Message Decoding Engine
//!
//! Extracts signal values from raw payloads based on a signal schema.
//! Decoding never aborts on payload shape: a length mismatch is marked on the
//! result and fields beyond the received bytes come out as `Unavailable`.

use crate::bitfield;
use crate::signals::{BitFieldSpec, SignalSchema};
use crate::types::{DecodedMessage, DecodedSignal, DecoderError, SignalValue, Timestamp};

/// Message decoder - extracts signals from payloads
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode a payload with its schema
    ///
    /// # Arguments
    /// * `timestamp` - Capture timestamp of the record
    /// * `payload` - Raw payload bytes (already validated as at most 8 bytes)
    /// * `schema` - Schema registered for the record's CAN ID
    pub fn decode_message(
        timestamp: Timestamp,
        payload: &[u8],
        schema: &SignalSchema,
    ) -> DecodedMessage {
        let length_mismatch = payload.len() != schema.expected_length();
        if length_mismatch {
            log::warn!(
                "'{}' (ID 0x{:X}) expects {} bytes but payload has {}",
                schema.name(),
                schema.can_id(),
                schema.expected_length(),
                payload.len()
            );
        }

        let signals = schema
            .fields()
            .iter()
            .map(|field| Self::decode_field(payload, field))
            .collect();

        DecodedMessage {
            timestamp,
            can_id: schema.can_id(),
            message_name: Some(schema.name().to_string()),
            raw_payload: payload.to_vec(),
            signals,
            length_mismatch,
        }
    }

    /// Pass-through for a CAN ID without a schema
    pub fn unknown_message(timestamp: Timestamp, can_id: u32, payload: &[u8]) -> DecodedMessage {
        log::trace!("Unknown CAN ID: 0x{:X}, passing payload through", can_id);
        DecodedMessage {
            timestamp,
            can_id,
            message_name: None,
            raw_payload: payload.to_vec(),
            signals: Vec::new(),
            length_mismatch: false,
        }
    }

    /// Decode a single field
    fn decode_field(payload: &[u8], field: &BitFieldSpec) -> DecodedSignal {
        match bitfield::extract(payload, field.byte_index, field.bit_offset, field.bit_width) {
            Ok(raw) => {
                let value = field.interpret(raw);
                if let SignalValue::Unrecognized(raw) = value {
                    log::warn!("Signal '{}' has unmapped raw value 0x{:02X}", field.name, raw);
                }
                DecodedSignal {
                    name: field.name.clone(),
                    value,
                    raw_value: Some(raw),
                }
            }
            Err(DecoderError::IndexError { .. }) => DecodedSignal {
                name: field.name.clone(),
                value: SignalValue::Unavailable,
                raw_value: None,
            },
            Err(e) => {
                // Layouts are validated when the schema is built
                log::error!("Signal '{}' could not be extracted: {}", field.name, e);
                DecodedSignal {
                    name: field.name.clone(),
                    value: SignalValue::Unavailable,
                    raw_value: None,
                }
            }
        }
    }
}
