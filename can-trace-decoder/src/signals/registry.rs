//! Schema registry
//!
//! Collects the signal schemas known to the decoder, keyed by CAN ID. The
//! built-in registry is created once per process and shared read-only.

use super::schema::SignalSchema;
use crate::pdc;
use crate::types::{DecoderError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// All registered schemas by CAN ID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<u32, SignalSchema>,
}

impl SchemaRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schema
    ///
    /// # Errors
    /// `SchemaError` if a schema for the same CAN ID is already registered.
    pub fn register(&mut self, schema: SignalSchema) -> Result<()> {
        let can_id = schema.can_id();
        if let Some(existing) = self.schemas.get(&can_id) {
            return Err(DecoderError::SchemaError(format!(
                "CAN ID 0x{:X} already registered as '{}'",
                can_id,
                existing.name()
            )));
        }

        log::debug!(
            "Registered schema '{}' (ID 0x{:X}, {} fields)",
            schema.name(),
            can_id,
            schema.fields().len()
        );
        self.schemas.insert(can_id, schema);
        Ok(())
    }

    /// Builder-style registration
    pub fn with_schema(mut self, schema: SignalSchema) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Get the schema for a CAN ID
    pub fn get(&self, can_id: u32) -> Option<&SignalSchema> {
        self.schemas.get(&can_id)
    }

    pub fn contains(&self, can_id: u32) -> bool {
        self.schemas.contains_key(&can_id)
    }

    /// Iterate schemas in ascending CAN ID order
    pub fn iter(&self) -> impl Iterator<Item = &SignalSchema> {
        self.schemas.values()
    }

    /// Get all registered CAN IDs in ascending order
    pub fn can_ids(&self) -> Vec<u32> {
        self.schemas.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            num_schemas: self.schemas.len(),
            num_fields: self.schemas.values().map(|s| s.fields().len()).sum(),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of registered schemas
    pub num_schemas: usize,
    /// Total number of fields across all schemas
    pub num_fields: usize,
}

static BUILTIN_REGISTRY: OnceLock<Result<Arc<SchemaRegistry>>> = OnceLock::new();

/// The process-wide registry of built-in schemas
///
/// Built on first use and never mutated afterwards. A definition error is
/// returned on every call so that callers fail before decoding anything.
pub fn builtin_registry() -> Result<Arc<SchemaRegistry>> {
    BUILTIN_REGISTRY
        .get_or_init(|| {
            let registry = SchemaRegistry::new().with_schema(pdc::schema()?)?;
            log::info!("Built-in schema registry ready: {} schema(s)", registry.len());
            Ok(Arc::new(registry))
        })
        .clone()
}
