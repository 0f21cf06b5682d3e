//! Trace analyzer configuration
//!
//! This module defines the options a caller can set for one trace analysis run.
//! Everything defaults to "analyze every record, allow empty traces".

use serde::{Deserialize, Serialize};

/// Configuration for the trace analyzer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Fail with `EmptyInput` when a trace has no records
    #[serde(default)]
    pub require_non_empty: bool,

    /// Optional: only analyze these CAN message IDs
    #[serde(default)]
    pub message_filter: Option<Vec<u32>>,

    /// Optional: stop after this many records per trace
    #[serde(default)]
    pub max_records: Option<usize>,

    /// Keep every classified record in the summary
    #[serde(default)]
    pub keep_records: bool,
}

impl AnalyzerConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: require non-empty traces
    pub fn with_require_non_empty(mut self, required: bool) -> Self {
        self.require_non_empty = required;
        self
    }

    /// Builder method: set message filter
    pub fn with_message_filter(mut self, messages: Vec<u32>) -> Self {
        self.message_filter = Some(messages);
        self
    }

    /// Builder method: cap the number of records read per trace
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Builder method: keep classified records in the summary
    pub fn with_keep_records(mut self, keep: bool) -> Self {
        self.keep_records = keep;
        self
    }

    /// Check if a message ID should be processed
    pub fn should_process_message(&self, can_id: u32) -> bool {
        match &self.message_filter {
            Some(messages) => messages.contains(&can_id),
            None => true,
        }
    }
}
