//! CSV trace reader
//!
//! Reads captures exported by the bus logger:
//!
//! ```text
//! Time Stamp,ID,Extended,Dir,Bus,LEN,D1,D2,D3,D4,D5,D6,D7,D8,
//! 1.234500,00000131,false,Rx,0,8,93,83,00,00,00,00,02,E0,
//! ```
//!
//! Columns are looked up by header name. ID and data bytes are hexadecimal,
//! LEN is decimal. Lines that cannot be parsed are recorded with their line
//! number and skipped; the rest of the file is still read.

use can_trace_decoder::types::{self, MAX_PAYLOAD_LEN};
use can_trace_decoder::CanRecord;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

const COL_TIMESTAMP: &str = "Time Stamp";
const COL_ID: &str = "ID";
const COL_LEN: &str = "LEN";

/// Largest LEN accepted without matching data columns (a CAN FD frame)
const MAX_FRAME_LEN: usize = 64;

/// Errors that make a whole trace file unreadable
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Failed to read trace file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Trace file has no header line")]
    MissingHeader,

    #[error("Required column '{0}' not found in header")]
    MissingColumn(&'static str),
}

/// A line that was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineError {
    /// 1-based line number in the file
    pub line: usize,
    pub message: String,
}

/// Records of one trace file plus the lines that could not be read
#[derive(Debug, Clone, Default)]
pub struct TraceFile {
    pub records: Vec<CanRecord>,
    pub errors: Vec<LineError>,
}

/// Column positions resolved from the header line
#[derive(Debug)]
struct Columns {
    timestamp: usize,
    id: usize,
    len: usize,
    /// Positions of D1, D2, ... in order
    data: Vec<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, ReaderError> {
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &'static str| {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or(ReaderError::MissingColumn(name))
        };

        let mut data = Vec::new();
        while let Some(pos) = names.iter().position(|n| *n == format!("D{}", data.len() + 1)) {
            data.push(pos);
        }

        Ok(Self {
            timestamp: find(COL_TIMESTAMP)?,
            id: find(COL_ID)?,
            len: find(COL_LEN)?,
            data,
        })
    }

    fn parse(&self, line: &str) -> Result<CanRecord, String> {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let cell = |pos: usize| cells.get(pos).copied().unwrap_or("");

        let timestamp: f64 = cell(self.timestamp)
            .parse()
            .map_err(|_| format!("bad timestamp '{}'", cell(self.timestamp)))?;

        let id_text = cell(self.id);
        let can_id = u32::from_str_radix(strip_hex_prefix(id_text), 16)
            .map_err(|_| format!("bad CAN ID '{}'", id_text))?;

        let len: usize = cell(self.len)
            .parse()
            .map_err(|_| format!("bad LEN '{}'", cell(self.len)))?;

        let max_len = self.data.len().max(MAX_FRAME_LEN);
        if len > max_len {
            return Err(format!("implausible LEN {} (at most {})", len, max_len));
        }

        let mut values = Vec::new();
        for i in 0..len {
            // Cells beyond the last data column or left empty read as 0
            let text = self.data.get(i).map(|&pos| cell(pos)).unwrap_or("");
            let value = if text.is_empty() {
                0
            } else {
                i64::from_str_radix(strip_hex_prefix(text), 16)
                    .map_err(|_| format!("bad data byte D{} '{}'", i + 1, text))?
            };
            values.push(value);
        }

        // Oversized payloads are kept so the analyzer can count them
        let mut data = Vec::new();
        for chunk in values.chunks(MAX_PAYLOAD_LEN) {
            data.extend(types::payload_from_values(chunk).map_err(|e| e.to_string())?);
        }

        Ok(CanRecord::new(timestamp, can_id, data))
    }
}

fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

/// Parse a trace from any buffered reader
pub fn parse_trace<R: BufRead>(reader: R) -> Result<TraceFile, ReaderError> {
    let mut lines = reader.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, Ok(line))) if line.trim().is_empty() => continue,
            Some((_, Ok(line))) => break line,
            Some((_, Err(e))) => {
                return Err(ReaderError::Io {
                    path: PathBuf::new(),
                    source: e,
                })
            }
            None => return Err(ReaderError::MissingHeader),
        }
    };
    let columns = Columns::from_header(header.trim_start_matches('\u{feff}'))?;
    log::trace!("Trace columns: {:?}", columns);

    let mut trace = TraceFile::default();
    for (index, line) in lines {
        let line_no = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                trace.errors.push(LineError {
                    line: line_no,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match columns.parse(&line) {
            Ok(record) => trace.records.push(record),
            Err(message) => {
                log::debug!("Skipping line {}: {}", line_no, message);
                trace.errors.push(LineError {
                    line: line_no,
                    message,
                });
            }
        }
    }

    Ok(trace)
}

/// Read a trace file from disk
pub fn read_trace(path: &Path) -> Result<TraceFile, ReaderError> {
    let file = File::open(path).map_err(|source| ReaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let trace = parse_trace(BufReader::new(file)).map_err(|e| match e {
        ReaderError::Io { source, .. } => ReaderError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;

    log::debug!(
        "Read {} record(s) from {:?} ({} unreadable line(s))",
        trace.records.len(),
        path,
        trace.errors.len()
    );
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HEADER: &str = "Time Stamp,ID,Extended,Dir,Bus,LEN,D1,D2,D3,D4,D5,D6,D7,D8,";

    fn parse(body: &str) -> TraceFile {
        parse_trace(Cursor::new(format!("{}\n{}", HEADER, body))).unwrap()
    }

    #[test]
    fn test_parse_full_record() {
        let trace = parse("1.250000,00000131,false,Rx,0,8,93,83,00,00,00,00,02,E0,\n");
        assert!(trace.errors.is_empty());
        assert_eq!(
            trace.records,
            vec![CanRecord::new(
                1.25,
                0x131,
                vec![0x93, 0x83, 0x00, 0x00, 0x00, 0x00, 0x02, 0xE0]
            )]
        );
    }

    #[test]
    fn test_len_limits_payload_and_empty_cells_read_zero() {
        let trace = parse("0.1,131,false,Rx,0,3,93,,FF,AA,BB,CC,DD,EE,\n");
        assert_eq!(trace.records[0].data, vec![0x93, 0x00, 0xFF]);
    }

    #[test]
    fn test_bad_lines_are_counted_not_fatal() {
        let trace = parse(
            "0.0,131,false,Rx,0,2,10,02,,,,,,,\n\
             oops,131,false,Rx,0,2,10,02,,,,,,,\n\
             0.2,XYZ,false,Rx,0,2,10,02,,,,,,,\n\
             0.3,131,false,Rx,0,2,10,GG,,,,,,,\n\
             \n\
             0.4,131,false,Rx,0,2,93,83,,,,,,,\n",
        );
        assert_eq!(trace.records.len(), 2);
        let lines: Vec<usize> = trace.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 5]);
    }

    #[test]
    fn test_byte_above_ff_is_rejected() {
        let trace = parse("0.0,131,false,Rx,0,1,100,,,,,,,,\n");
        assert!(trace.records.is_empty());
        assert!(trace.errors[0].message.contains("Invalid input"));
    }

    #[test]
    fn test_oversized_len_still_yields_record() {
        let trace = parse("0.0,131,false,Rx,0,10,93,83,00,00,00,00,02,E0,\n");
        assert!(trace.errors.is_empty());
        assert_eq!(trace.records[0].data.len(), 10);
        assert_eq!(trace.records[0].data[8..], [0, 0]);
    }

    #[test]
    fn test_implausible_len_is_a_line_error() {
        let trace = parse(
            "0.0,131,false,Rx,0,8,10,02,00,00,00,00,00,00,\n\
             0.1,131,false,Rx,0,18446744073709551615,93,83,,,,,,,\n\
             0.2,131,false,Rx,0,1000000000,93,83,,,,,,,\n\
             0.3,131,false,Rx,0,8,93,83,00,00,00,00,02,E0,\n",
        );
        assert_eq!(trace.records.len(), 2);
        let lines: Vec<usize> = trace.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert!(trace.errors[0].message.contains("implausible LEN"));
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let err = parse_trace(Cursor::new("Time Stamp,Bus,LEN\n0,0,0\n")).unwrap_err();
        assert!(matches!(err, ReaderError::MissingColumn("ID")));
        assert!(matches!(
            parse_trace(Cursor::new("")).unwrap_err(),
            ReaderError::MissingHeader
        ));
    }

    #[test]
    fn test_read_trace_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(file, "0.000100,00000131,false,Rx,0,8,10,02,00,00,00,00,00,00,").unwrap();
        writeln!(file, "0.020100,000003A0,false,Rx,0,2,01,02,,,,,,,").unwrap();

        let trace = read_trace(file.path()).unwrap();
        assert_eq!(trace.records.len(), 2);
        assert_eq!(trace.records[1].can_id, 0x3A0);

        let missing = read_trace(Path::new("/nonexistent/131.csv")).unwrap_err();
        assert!(matches!(missing, ReaderError::Io { .. }));
    }
}
