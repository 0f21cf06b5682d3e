//! CAN Trace Decoder Library
//!
//! A reusable library for decoding parking-distance-control (PDC) status frames
//! from CAN traces, classifying them into operating states and comparing whole
//! captures against their observed real-world outcome.
//!
//! # Architecture
//!
//! The library is layered bottom-up:
//! - `bitfield` extracts unsigned fields from single payload bytes
//! - `signals` holds declarative schemas and the read-only registry
//! - `decoder` turns `(can_id, payload)` into a decoded message
//! - `classifier` maps decoded messages to states with a first-match rule table
//! - `analyzer` summarizes one trace (state counts, transitions, anomalies)
//! - `comparator` groups traces by state fingerprint and reports outcome discrepancies
//!
//! The library does NOT:
//! - Read trace files from disk
//! - Derive outcomes from file names
//! - Render reports
//!
//! All of that lives in the application layer (can-trace-cli).
//!
//! # Example Usage
//!
//! ```
//! use can_trace_decoder::{analyze_trace, CanRecord, ClassifiedState, TraceLabel};
//!
//! let records = vec![
//!     CanRecord::new(0.00, 0x131, vec![0x93, 0x83, 0, 0, 0, 0, 0x00, 0x00]),
//!     CanRecord::new(0.02, 0x131, vec![0x93, 0x83, 0, 0, 0, 0, 0x02, 0xE0]),
//!     CanRecord::new(0.04, 0x131, vec![0x93, 0x83, 0, 0, 0, 0, 0x00, 0x00]),
//! ];
//!
//! let summary = analyze_trace("capture.csv", &records).unwrap();
//! assert_eq!(summary.label, TraceLabel::Oscillating);
//! assert!(summary.has_state(&ClassifiedState::ObstacleDetected));
//! ```

// Public modules
pub mod analyzer;
pub mod bitfield;
pub mod classifier;
pub mod comparator;
pub mod config;
pub mod decoder;
pub mod pdc;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use analyzer::{
    analyze_trace, Anomaly, ClassifiedRecord, Fingerprint, PayloadPattern, RecordError,
    TraceAnalyzer, TraceLabel, TraceSummary, Transition,
};
pub use classifier::{
    builtin_rules, ClassifiedState, Condition, Expected, Rule, RuleTable, StateClassifier,
};
pub use comparator::{
    compare, ComparisonReport, CorpusComparator, Discrepancy, FingerprintGroup, GroupMember,
    OutcomeFlag,
};
pub use config::AnalyzerConfig;
pub use decoder::Decoder;
pub use signals::{
    builtin_registry, BitFieldSpec, RegistryStats, SchemaDefinition, SchemaRegistry, SignalSchema,
};
pub use types::{
    CanRecord, DecodedMessage, DecodedSignal, DecoderError, Result, SignalValue, Timestamp,
};

// Internal modules (not exposed in public API)
mod message_decoder;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Decode one payload with the built-in registry
pub fn decode(can_id: u32, payload: &[u8]) -> Result<DecodedMessage> {
    Decoder::builtin()?.decode(can_id, payload)
}
