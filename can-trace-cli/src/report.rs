//! Report generation
//!
//! Renders decoded messages, per-capture summaries and corpus comparisons as
//! plain text or JSON.

use crate::outcome::CaptureCategory;
use crate::trace_reader::LineError;
use anyhow::{Context, Result};
use can_trace_decoder::{
    types, Anomaly, ClassifiedState, ComparisonReport, DecodedMessage, Decoder, OutcomeFlag,
    StateClassifier, TraceSummary,
};
use serde::Serialize;
use std::io::Write;

const RULE: &str = "═══════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────";

/// One decoded and classified payload
#[derive(Debug, Serialize)]
pub struct MessageReport {
    pub message: DecodedMessage,
    pub state: ClassifiedState,
}

/// Analysis result of one capture file
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file_id: String,
    pub category: CaptureCategory,
    pub outcome: Option<String>,
    /// Lines the reader could not parse
    pub reader_errors: Vec<LineError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TraceSummary>,
    /// Why the file could not be analyzed at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Analysis and comparison of a set of captures
#[derive(Debug, Serialize)]
pub struct CorpusReport {
    pub generated_at: String,
    pub files: Vec<FileReport>,
    pub comparison: ComparisonReport,
}

/// Local generation time as shown in report headers
pub fn generated_at() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Pretty-printed JSON
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize report")
}

fn states_list(states: &[ClassifiedState]) -> String {
    states
        .iter()
        .map(ClassifiedState::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Share of `count` in `total` as a percentage; 0 for an empty total
fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

pub fn write_message<W: Write>(out: &mut W, report: &MessageReport) -> std::io::Result<()> {
    let msg = &report.message;
    writeln!(
        out,
        "ID 0x{:03X} ({})  [{}]",
        msg.can_id,
        msg.message_name.as_deref().unwrap_or("unknown message"),
        msg.payload_hex()
    )?;
    if msg.length_mismatch {
        writeln!(out, "  ⚠ payload length differs from the schema")?;
    }
    for signal in &msg.signals {
        match signal.raw_value {
            Some(raw) => writeln!(
                out,
                "  {:<16} {:<14} (raw 0x{:02X})",
                signal.name,
                signal.value.to_string(),
                raw
            )?,
            None => writeln!(out, "  {:<16} {}", signal.name, signal.value)?,
        }
    }
    writeln!(out, "  → state: {}", report.state)
}

pub fn write_file<W: Write>(out: &mut W, report: &FileReport) -> std::io::Result<()> {
    writeln!(out, "📄 {}", report.file_id)?;
    writeln!(out, "  Capture:           {}", report.category)?;
    if let Some(outcome) = &report.outcome {
        writeln!(out, "  Declared outcome:  {}", outcome)?;
    }
    if !report.reader_errors.is_empty() {
        writeln!(out, "  Unreadable lines:  {}", report.reader_errors.len())?;
        for err in report.reader_errors.iter().take(5) {
            writeln!(out, "    line {}: {}", err.line, err.message)?;
        }
    }

    let summary = match (&report.summary, &report.error) {
        (Some(summary), _) => summary,
        (None, Some(error)) => return writeln!(out, "  ✗ {}", error),
        (None, None) => return Ok(()),
    };

    writeln!(
        out,
        "  Records:           {} ({} classified, {} other IDs, {} filtered, {} errors)",
        summary.total_records,
        summary.classified_records,
        summary.unmatched_records,
        summary.filtered_records,
        summary.error_count
    )?;
    if let Some(duration) = summary.duration() {
        writeln!(out, "  Duration:          {:.3} s", duration)?;
    }
    writeln!(
        out,
        "  Trace:             {} ({} transitions)",
        summary.label,
        summary.transition_count()
    )?;
    let classified = summary.classified_records;
    writeln!(
        out,
        "  Beeper requests:   {} ({:.1}%)",
        summary.beeper_requests,
        percent(summary.beeper_requests, classified)
    )?;
    if summary.length_mismatches > 0 {
        writeln!(out, "  Length mismatches: {}", summary.length_mismatches)?;
    }

    writeln!(out, "  States:")?;
    for (state, count) in &summary.state_counts {
        writeln!(
            out,
            "    {:<26} {:>6} ({:5.1}%)",
            state.to_string(),
            count,
            percent(*count, classified)
        )?;
    }

    if !summary.unique_patterns.is_empty() {
        writeln!(out, "  Payload patterns:")?;
        for pattern in &summary.unique_patterns {
            writeln!(
                out,
                "    0x{:03X} [{}] x{} → {}",
                pattern.can_id,
                types::hex_string(&pattern.payload),
                pattern.count,
                pattern.state
            )?;
        }
    }

    for anomaly in &summary.anomalies {
        match anomaly {
            Anomaly::AlarmWithoutBeeper { start_index, end_index, records } => writeln!(
                out,
                "  ⚠ alarm without beeper request: records {}..={} ({} frames)",
                start_index, end_index, records
            )?,
            Anomaly::UnclassifiedPattern {
                first_index,
                can_id,
                payload,
                signals,
                occurrences,
            } => {
                writeln!(
                    out,
                    "  ⚠ unclassified 0x{:03X} [{}] first at record {} ({} times)",
                    can_id,
                    types::hex_string(payload),
                    first_index,
                    occurrences
                )?;
                let decoded: Vec<String> = signals
                    .iter()
                    .map(|signal| format!("{}={}", signal.name, signal.value))
                    .collect();
                if !decoded.is_empty() {
                    writeln!(out, "      {}", decoded.join(" "))?;
                }
            }
        }
    }

    for err in summary.errors.iter().take(5) {
        writeln!(
            out,
            "  ✗ record {} (ID 0x{:X}): {}",
            err.index, err.can_id, err.message
        )?;
    }
    Ok(())
}

pub fn write_comparison<W: Write>(out: &mut W, report: &ComparisonReport) -> std::io::Result<()> {
    writeln!(out, "{}", THIN_RULE)?;
    writeln!(out, "Fingerprint groups:")?;
    for group in &report.groups {
        writeln!(out, "  {{{}}}", states_list(&group.fingerprint))?;
        for member in &group.members {
            writeln!(out, "    {:<40} {}", member.file_id, member.outcome)?;
        }
    }

    writeln!(out)?;
    if report.discrepancies.is_empty() {
        writeln!(out, "✓ No fingerprint appears with differing outcomes")?;
    } else {
        writeln!(out, "⚠ Same CAN behavior, different outcome:")?;
        for discrepancy in &report.discrepancies {
            writeln!(out, "  {{{}}}", states_list(&discrepancy.fingerprint))?;
            for (outcome, files) in &discrepancy.outcomes {
                writeln!(out, "    {}: {}", outcome, files.join(", "))?;
            }
        }
    }

    if !report.outcome_flags.is_empty() {
        writeln!(out)?;
        writeln!(out, "Outcome checks:")?;
        for flag in &report.outcome_flags {
            match flag {
                OutcomeFlag::BeeperRequestedWithoutSound { file_id, beeper_requests } => writeln!(
                    out,
                    "  ⚠ {}: no sound declared, but {} beeper request(s) on the bus",
                    file_id, beeper_requests
                )?,
                OutcomeFlag::SoundWithoutBeeperRequest { file_id } => writeln!(
                    out,
                    "  ⚠ {}: sound declared, but only alarms without beeper request",
                    file_id
                )?,
            }
        }
    }

    if !report.unlabeled.is_empty() {
        writeln!(out)?;
        writeln!(out, "Not compared (no outcome): {}", report.unlabeled.join(", "))?;
    }
    Ok(())
}

pub fn write_corpus<W: Write>(out: &mut W, report: &CorpusReport) -> std::io::Result<()> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "  CAN Trace Comparison - {} capture(s)", report.files.len())?;
    writeln!(out, "  Generated {}", report.generated_at)?;
    writeln!(out, "{}\n", RULE)?;

    for file in &report.files {
        write_file(out, file)?;
        writeln!(out)?;
    }
    write_comparison(out, &report.comparison)
}

pub fn write_info<W: Write>(
    out: &mut W,
    decoder: &Decoder,
    classifier: &StateClassifier,
) -> std::io::Result<()> {
    let stats = decoder.registry_stats();
    writeln!(
        out,
        "📊 Signal schemas: {} ({} fields)",
        stats.num_schemas, stats.num_fields
    )?;
    for schema in decoder.registry().iter() {
        writeln!(
            out,
            "  0x{:03X} {} ({} bytes)",
            schema.can_id(),
            schema.name(),
            schema.expected_length()
        )?;
        for field in schema.fields() {
            write!(
                out,
                "    {:<16} byte {} bits {}..{}",
                field.name,
                field.byte_index,
                field.bit_offset,
                field.bit_offset + field.bit_width - 1
            )?;
            match &field.enum_map {
                Some(map) => {
                    let entries: Vec<String> = map
                        .iter()
                        .map(|(raw, label)| format!("0x{:02X}={}", raw, label))
                        .collect();
                    writeln!(out, "  {{{}}}", entries.join(", "))?;
                }
                None => writeln!(out)?,
            }
        }
    }

    writeln!(out, "\n📋 Classification rules: {}", classifier.rules().len())?;
    for rule in classifier.rules().iter() {
        let conditions: Vec<String> = rule
            .conditions
            .iter()
            .map(|c| format!("{} = {}", c.signal, c.equals))
            .collect();
        writeln!(
            out,
            "  0x{:03X} {:<26} {}",
            rule.can_id,
            rule.state.to_string(),
            conditions.join(" && ")
        )?;
    }
    Ok(())
}
