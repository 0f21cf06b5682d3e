//! Trace analysis
//!
//! Runs every record of one capture through the decoder and the classifier,
//! in arrival order, and folds the results into a [`TraceSummary`]. Records
//! are never reordered or deduplicated. A record that fails to decode is
//! counted and skipped; it never aborts the rest of the capture.

use crate::classifier::{ClassifiedState, StateClassifier};
use crate::config::AnalyzerConfig;
use crate::decoder::Decoder;
use crate::pdc;
use crate::types::{CanRecord, DecodedSignal, DecoderError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Set of distinct states observed in one capture
pub type Fingerprint = BTreeSet<ClassifiedState>;

/// Overall shape of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLabel {
    /// No record matched a schema
    Empty,
    /// At most one state change
    Stable,
    /// Two or more state changes
    Oscillating,
}

impl TraceLabel {
    fn derive(classified_records: usize, transitions: usize) -> Self {
        if classified_records == 0 {
            TraceLabel::Empty
        } else if transitions <= 1 {
            TraceLabel::Stable
        } else {
            TraceLabel::Oscillating
        }
    }
}

impl fmt::Display for TraceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLabel::Empty => write!(f, "empty"),
            TraceLabel::Stable => write!(f, "stable"),
            TraceLabel::Oscillating => write!(f, "oscillating"),
        }
    }
}

/// A change of classified state between consecutive classified records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ClassifiedState,
    pub to: ClassifiedState,
    /// Position of the first record in the new state (index in the input sequence)
    pub at_index: usize,
    pub timestamp: Timestamp,
}

/// A record that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub index: usize,
    pub can_id: u32,
    pub message: String,
}

/// One classified record, kept when [`AnalyzerConfig::keep_records`] is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub index: usize,
    pub timestamp: Timestamp,
    pub can_id: u32,
    pub state: ClassifiedState,
    pub signals: Vec<DecodedSignal>,
    pub length_mismatch: bool,
}

/// A distinct payload seen in the capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadPattern {
    pub can_id: u32,
    pub payload: Vec<u8>,
    pub state: ClassifiedState,
    pub count: usize,
}

/// Something in the capture worth a closer look
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Consecutive records with an active alarm but no beeper request
    AlarmWithoutBeeper {
        start_index: usize,
        end_index: usize,
        records: usize,
    },
    /// A payload no rule recognized, with its decoded signals for inspection
    UnclassifiedPattern {
        first_index: usize,
        can_id: u32,
        payload: Vec<u8>,
        signals: Vec<DecodedSignal>,
        occurrences: usize,
    },
}

/// Result of analyzing one capture
///
/// Built once by [`TraceAnalyzer::analyze`]; analyzing the same records again
/// yields an identical summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub file_id: String,
    pub label: TraceLabel,
    /// Records read from the input (after `max_records`)
    pub total_records: usize,
    /// Records decoded with a schema and classified
    pub classified_records: usize,
    /// Records whose CAN ID has no schema
    pub unmatched_records: usize,
    /// Records skipped by the message filter
    pub filtered_records: usize,
    pub error_count: usize,
    pub errors: Vec<RecordError>,
    /// Classified records whose payload length differed from the schema
    pub length_mismatches: usize,
    /// Classified records requesting the beeper
    pub beeper_requests: usize,
    pub state_counts: BTreeMap<ClassifiedState, usize>,
    pub transitions: Vec<Transition>,
    pub unique_patterns: Vec<PayloadPattern>,
    pub anomalies: Vec<Anomaly>,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<ClassifiedRecord>,
}

impl TraceSummary {
    /// Distinct states observed, ignoring counts and timing
    pub fn fingerprint(&self) -> Fingerprint {
        self.state_counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(state, _)| state.clone())
            .collect()
    }

    pub fn state_count(&self, state: &ClassifiedState) -> usize {
        self.state_counts.get(state).copied().unwrap_or(0)
    }

    pub fn has_state(&self, state: &ClassifiedState) -> bool {
        self.state_count(state) > 0
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Time between the first and the last record
    pub fn duration(&self) -> Option<Timestamp> {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label == TraceLabel::Empty
    }
}

/// Open run of alarm-without-beeper records
#[derive(Debug, Clone, Copy)]
struct AlarmRun {
    start_index: usize,
    end_index: usize,
    records: usize,
}

impl From<AlarmRun> for Anomaly {
    fn from(run: AlarmRun) -> Self {
        Anomaly::AlarmWithoutBeeper {
            start_index: run.start_index,
            end_index: run.end_index,
            records: run.records,
        }
    }
}

/// First sighting and count of a payload classified as `Unknown`
struct Unclassified {
    first_index: usize,
    signals: Vec<DecodedSignal>,
    occurrences: usize,
}

/// Per-capture accumulator; consumed by `finish`
#[derive(Default)]
struct TraceBuilder {
    keep_records: bool,
    total_records: usize,
    classified_records: usize,
    unmatched_records: usize,
    filtered_records: usize,
    length_mismatches: usize,
    beeper_requests: usize,
    errors: Vec<RecordError>,
    state_counts: BTreeMap<ClassifiedState, usize>,
    transitions: Vec<Transition>,
    patterns: BTreeMap<(u32, Vec<u8>), (ClassifiedState, usize)>,
    unclassified: BTreeMap<(u32, Vec<u8>), Unclassified>,
    alarm_runs: Vec<Anomaly>,
    open_run: Option<AlarmRun>,
    previous: Option<ClassifiedState>,
    first_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
    records: Vec<ClassifiedRecord>,
}

impl TraceBuilder {
    fn new(keep_records: bool) -> Self {
        Self {
            keep_records,
            ..Self::default()
        }
    }

    fn push(
        &mut self,
        index: usize,
        record: &CanRecord,
        decoder: &Decoder,
        classifier: &StateClassifier,
        config: &AnalyzerConfig,
    ) {
        self.total_records += 1;

        if !config.should_process_message(record.can_id) {
            self.filtered_records += 1;
            return;
        }

        self.first_timestamp.get_or_insert(record.timestamp);
        self.last_timestamp = Some(record.timestamp);

        let message = match decoder.decode_record(record) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Skipping record {} (ID 0x{:X}): {}", index, record.can_id, e);
                self.errors.push(RecordError {
                    index,
                    can_id: record.can_id,
                    message: e.to_string(),
                });
                return;
            }
        };

        if !message.is_known() {
            self.unmatched_records += 1;
            return;
        }

        if message.length_mismatch {
            self.length_mismatches += 1;
        }
        if pdc::is_beeper_request(&message) {
            self.beeper_requests += 1;
        }

        let state = classifier.classify(&message);
        self.classified_records += 1;
        *self.state_counts.entry(state.clone()).or_insert(0) += 1;

        if let Some(previous) = &self.previous {
            if *previous != state {
                self.transitions.push(Transition {
                    from: previous.clone(),
                    to: state.clone(),
                    at_index: index,
                    timestamp: record.timestamp,
                });
            }
        }

        self.track_alarm_run(index, &state);

        self.patterns
            .entry((message.can_id, message.raw_payload.clone()))
            .or_insert_with(|| (state.clone(), 0))
            .1 += 1;

        if state == ClassifiedState::Unknown {
            self.unclassified
                .entry((message.can_id, message.raw_payload.clone()))
                .or_insert_with(|| Unclassified {
                    first_index: index,
                    signals: message.signals.clone(),
                    occurrences: 0,
                })
                .occurrences += 1;
        }

        if self.keep_records {
            self.records.push(ClassifiedRecord {
                index,
                timestamp: message.timestamp,
                can_id: message.can_id,
                state: state.clone(),
                signals: message.signals,
                length_mismatch: message.length_mismatch,
            });
        }

        self.previous = Some(state);
    }

    fn track_alarm_run(&mut self, index: usize, state: &ClassifiedState) {
        if *state == ClassifiedState::ObstacleDetectedNoBeeper {
            match &mut self.open_run {
                Some(run) => {
                    run.end_index = index;
                    run.records += 1;
                }
                None => {
                    self.open_run = Some(AlarmRun {
                        start_index: index,
                        end_index: index,
                        records: 1,
                    });
                }
            }
        } else if let Some(run) = self.open_run.take() {
            self.alarm_runs.push(run.into());
        }
    }

    fn finish(mut self, file_id: &str) -> TraceSummary {
        if let Some(run) = self.open_run.take() {
            self.alarm_runs.push(run.into());
        }

        let mut unclassified: Vec<Anomaly> = self
            .unclassified
            .into_iter()
            .map(|((can_id, payload), seen)| Anomaly::UnclassifiedPattern {
                first_index: seen.first_index,
                can_id,
                payload,
                signals: seen.signals,
                occurrences: seen.occurrences,
            })
            .collect();
        unclassified.sort_by_key(|a| match a {
            Anomaly::UnclassifiedPattern { first_index, .. } => *first_index,
            Anomaly::AlarmWithoutBeeper { start_index, .. } => *start_index,
        });

        let mut anomalies = self.alarm_runs;
        anomalies.extend(unclassified);

        let unique_patterns = self
            .patterns
            .into_iter()
            .map(|((can_id, payload), (state, count))| PayloadPattern {
                can_id,
                payload,
                state,
                count,
            })
            .collect();

        let label = TraceLabel::derive(self.classified_records, self.transitions.len());

        TraceSummary {
            file_id: file_id.to_string(),
            label,
            total_records: self.total_records,
            classified_records: self.classified_records,
            unmatched_records: self.unmatched_records,
            filtered_records: self.filtered_records,
            error_count: self.errors.len(),
            errors: self.errors,
            length_mismatches: self.length_mismatches,
            beeper_requests: self.beeper_requests,
            state_counts: self.state_counts,
            transitions: self.transitions,
            unique_patterns,
            anomalies,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
            records: self.records,
        }
    }
}

/// Analyzer for single captures
///
/// Holds no per-trace state: every call to [`TraceAnalyzer::analyze`] owns its
/// own accumulator, so one analyzer can serve several threads.
#[derive(Debug, Clone)]
pub struct TraceAnalyzer<'a> {
    decoder: &'a Decoder,
    classifier: &'a StateClassifier,
    config: AnalyzerConfig,
}

impl<'a> TraceAnalyzer<'a> {
    pub fn new(decoder: &'a Decoder, classifier: &'a StateClassifier) -> Self {
        Self {
            decoder,
            classifier,
            config: AnalyzerConfig::default(),
        }
    }

    /// Builder method: set the analyzer configuration
    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze one capture
    ///
    /// # Errors
    /// `EmptyInput` if the capture has no records and
    /// [`AnalyzerConfig::require_non_empty`] is set. Bad records are counted
    /// in the summary, never returned as errors.
    pub fn analyze<I>(&self, file_id: &str, records: I) -> Result<TraceSummary>
    where
        I: IntoIterator,
        I::Item: Borrow<CanRecord>,
    {
        let limit = self.config.max_records.unwrap_or(usize::MAX);
        let mut builder = TraceBuilder::new(self.config.keep_records);

        for (index, record) in records.into_iter().take(limit).enumerate() {
            builder.push(index, record.borrow(), self.decoder, self.classifier, &self.config);
        }

        if builder.total_records == 0 && self.config.require_non_empty {
            return Err(DecoderError::EmptyInput);
        }

        let summary = builder.finish(file_id);
        log::info!(
            "Trace '{}' analyzed: {} records, {} classified, {} errors, {} transitions ({})",
            summary.file_id,
            summary.total_records,
            summary.classified_records,
            summary.error_count,
            summary.transitions.len(),
            summary.label
        );
        Ok(summary)
    }
}

/// Analyze one capture with the built-in schemas, rules and default configuration
///
/// # Example
/// ```
/// use can_trace_decoder::{analyze_trace, CanRecord, TraceLabel};
///
/// let records = vec![
///     CanRecord::new(0.0, 0x131, vec![0x93, 0x83, 0, 0, 0, 0, 0x00, 0x00]),
///     CanRecord::new(0.1, 0x131, vec![0x93, 0x83, 0, 0, 0, 0, 0x02, 0xE0]),
/// ];
/// let summary = analyze_trace("capture.csv", &records).unwrap();
/// assert_eq!(summary.label, TraceLabel::Stable);
/// ```
pub fn analyze_trace<I>(file_id: &str, records: I) -> Result<TraceSummary>
where
    I: IntoIterator,
    I::Item: Borrow<CanRecord>,
{
    let decoder = Decoder::builtin()?;
    let classifier = StateClassifier::builtin()?;
    TraceAnalyzer::new(&decoder, &classifier).analyze(file_id, records)
}
