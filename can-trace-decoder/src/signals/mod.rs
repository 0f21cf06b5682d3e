//! Signal schemas and the schema registry
//!
//! Schemas describe where each named signal lives in a payload. The registry
//! maps CAN IDs to schemas.

pub mod registry;
pub mod schema;

// Re-export key types for convenience
pub use registry::{builtin_registry, RegistryStats, SchemaRegistry};
pub use schema::{BitFieldSpec, SchemaDefinition, SignalSchema};
