//! Main decoder API
//!
//! The [`Decoder`] owns a read-only schema registry and turns input records
//! into decoded messages. It is cheap to clone and safe to share between
//! threads.

use crate::message_decoder::MessageDecoder;
use crate::signals::{builtin_registry, RegistryStats, SchemaRegistry};
use crate::types::{self, CanRecord, DecodedMessage, Result, Timestamp};
use std::sync::Arc;

/// The main decoder struct - entry point for all decoding operations
#[derive(Debug, Clone)]
pub struct Decoder {
    registry: Arc<SchemaRegistry>,
}

impl Decoder {
    /// Create a decoder without any schema (every message passes through)
    pub fn new() -> Self {
        Self::with_registry(SchemaRegistry::new())
    }

    /// Create a decoder over a custom registry
    pub fn with_registry(registry: SchemaRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Create a decoder over the process-wide built-in registry
    ///
    /// # Example
    /// ```
    /// use can_trace_decoder::{Decoder, SignalValue};
    ///
    /// let decoder = Decoder::builtin().unwrap();
    /// let msg = decoder.decode(0x131, &[0x93, 0x83, 0, 0, 0, 0, 0x02, 0xE0]).unwrap();
    /// assert_eq!(msg.signal("system_active"), Some(&SignalValue::Boolean(true)));
    /// ```
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            registry: builtin_registry()?,
        })
    }

    /// Decode one payload
    ///
    /// Unknown CAN IDs pass through with an empty signal list.
    ///
    /// # Errors
    /// `InvalidInput` if the payload is longer than 8 bytes or the ID exceeds 29 bits.
    pub fn decode(&self, can_id: u32, payload: &[u8]) -> Result<DecodedMessage> {
        self.decode_at(0.0, can_id, payload)
    }

    /// Decode one payload given as integer values
    ///
    /// # Errors
    /// `InvalidInput` if any value lies outside 0..=255, plus the errors of [`Decoder::decode`].
    pub fn decode_values(&self, can_id: u32, values: &[i64]) -> Result<DecodedMessage> {
        let payload = types::payload_from_values(values)?;
        self.decode(can_id, &payload)
    }

    /// Decode one trace record
    pub fn decode_record(&self, record: &CanRecord) -> Result<DecodedMessage> {
        self.decode_at(record.timestamp, record.can_id, &record.data)
    }

    fn decode_at(
        &self,
        timestamp: Timestamp,
        can_id: u32,
        payload: &[u8],
    ) -> Result<DecodedMessage> {
        types::validate_input(can_id, payload)?;

        match self.registry.get(can_id) {
            Some(schema) => {
                log::debug!("Decoding message: {} (ID 0x{:X})", schema.name(), can_id);
                Ok(MessageDecoder::decode_message(timestamp, payload, schema))
            }
            None => Ok(MessageDecoder::unknown_message(timestamp, can_id, payload)),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Get statistics about the loaded schemas
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
