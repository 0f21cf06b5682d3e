//! CAN Trace Analyzer CLI Application
//!
//! This is the command-line interface for the parking-sensor trace analyzer.
//! It uses the can-trace-decoder library and adds:
//! - CSV trace file reading
//! - Outcome labels derived from capture file names
//! - Parallel analysis of whole capture directories
//! - Text and JSON reports

use anyhow::{bail, Context, Result};
use can_trace_decoder::{Decoder, StateClassifier, TraceAnalyzer};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

mod config;
mod outcome;
mod report;
mod trace_reader;

use config::AppConfig;
use report::{CorpusReport, FileReport, MessageReport};

/// CAN Trace Analyzer - Decode and compare parking sensor captures
#[derive(Parser, Debug)]
#[command(name = "can-trace")]
#[command(about = "Decode CAN traces and compare captures by classified state", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode and classify a single payload
    Message {
        /// CAN ID in hex (e.g. 131 or 0x131)
        #[arg(value_parser = parse_hex_id)]
        can_id: u32,

        /// Payload bytes in hex (e.g. 93 83 00 00 00 00 02 E0)
        #[arg(num_args = 0..)]
        bytes: Vec<String>,
    },

    /// Analyze one capture file
    File {
        path: PathBuf,

        /// Include every classified record in the report
        #[arg(long)]
        records: bool,

        /// Stop after this many records
        #[arg(long, value_name = "COUNT")]
        max_records: Option<usize>,
    },

    /// Analyze several captures and compare them by state fingerprint
    Compare {
        /// Capture files (in addition to those listed in the configuration)
        paths: Vec<PathBuf>,

        /// Also pick up matching captures from this directory
        #[arg(short, long, value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// List the loaded signal schemas and classification rules
    Info,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Trace Analyzer v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", can_trace_decoder::VERSION);

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    // Schema and rule problems stop the run before any trace is read
    let decoder = config.build_decoder()?;
    let classifier = config.build_classifier(&decoder)?;

    match &args.command {
        Command::Message { can_id, bytes } => {
            message_mode(&decoder, &classifier, *can_id, bytes, args.json)
        }
        Command::File {
            path,
            records,
            max_records,
        } => {
            let mut config = config.clone();
            config.analysis.keep_records |= *records;
            if let Some(max) = max_records {
                config.analysis.max_records = Some(*max);
            }
            file_mode(&decoder, &classifier, &config, path, args.json)
        }
        Command::Compare { paths, directory } => {
            let mut config = config.clone();
            config.input.files.extend(paths.iter().cloned());
            if directory.is_some() {
                config.input.directory = directory.clone();
            }
            compare_mode(&decoder, &classifier, &config, args.json)
        }
        Command::Info => {
            let mut out = io::stdout().lock();
            report::write_info(&mut out, &decoder, &classifier)?;
            Ok(())
        }
    }
}

fn parse_hex_id(text: &str) -> std::result::Result<u32, String> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("'{}' is not a hex CAN ID: {}", text, e))
}

/// Hex byte arguments, each possibly holding several space-separated bytes
fn parse_hex_bytes(args: &[String]) -> Result<Vec<i64>> {
    args.iter()
        .flat_map(|arg| arg.split_whitespace())
        .map(|text| {
            let digits = text.trim_start_matches("0x").trim_start_matches("0X");
            i64::from_str_radix(digits, 16).with_context(|| format!("'{}' is not a hex byte", text))
        })
        .collect()
}

/// Decode one payload and print its signals and state
fn message_mode(
    decoder: &Decoder,
    classifier: &StateClassifier,
    can_id: u32,
    bytes: &[String],
    json: bool,
) -> Result<()> {
    let values = parse_hex_bytes(bytes)?;
    let message = decoder.decode_values(can_id, &values)?;
    let state = classifier.classify(&message);
    let report = MessageReport { message, state };

    if json {
        println!("{}", report::to_json(&report)?);
    } else {
        report::write_message(&mut io::stdout().lock(), &report)?;
    }
    Ok(())
}

/// Read and analyze one capture; failures end up in the report, not in `Err`
fn analyze_file(
    path: &Path,
    decoder: &Decoder,
    classifier: &StateClassifier,
    config: &AppConfig,
) -> FileReport {
    let file_id = path.display().to_string();
    let declared = config.outcomes.declare(path);
    log::debug!("{} is a {} capture", file_id, declared.category);

    let trace = match trace_reader::read_trace(path) {
        Ok(trace) => trace,
        Err(e) => {
            log::error!("Cannot read {}: {}", file_id, e);
            return FileReport {
                file_id,
                category: declared.category,
                outcome: declared.outcome,
                reader_errors: Vec::new(),
                summary: None,
                error: Some(e.to_string()),
            };
        }
    };

    let analyzer = TraceAnalyzer::new(decoder, classifier).with_config(config.analysis.clone());
    let (summary, error) = match analyzer.analyze(&file_id, &trace.records) {
        Ok(summary) => (Some(summary), None),
        Err(e) => {
            log::warn!("Cannot analyze {}: {}", file_id, e);
            (None, Some(e.to_string()))
        }
    };

    FileReport {
        file_id,
        category: declared.category,
        outcome: declared.outcome,
        reader_errors: trace.errors,
        summary,
        error,
    }
}

fn file_mode(
    decoder: &Decoder,
    classifier: &StateClassifier,
    config: &AppConfig,
    path: &Path,
    json: bool,
) -> Result<()> {
    let report = analyze_file(path, decoder, classifier, config);

    if json {
        println!("{}", report::to_json(&report)?);
    } else {
        let mut out = io::stdout().lock();
        writeln!(out, "Generated {}\n", report::generated_at())?;
        report::write_file(&mut out, &report)?;
    }

    if report.summary.is_none() {
        bail!("{} could not be analyzed", report.file_id);
    }
    Ok(())
}

/// Analyze every capture in parallel, then compare them
fn compare_mode(
    decoder: &Decoder,
    classifier: &StateClassifier,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let files = config.input.resolve_files()?;
    if files.is_empty() {
        bail!("No capture files given (use paths, --directory or [input] in the config)");
    }
    log::info!("Analyzing {} capture(s)", files.len());

    // Each file owns its own analysis; only the finished reports are merged
    let mut files: Vec<FileReport> = files
        .par_iter()
        .map(|path| analyze_file(path, decoder, classifier, config))
        .collect();
    files.sort_by(|a, b| a.file_id.cmp(&b.file_id));

    let mut summaries = BTreeMap::new();
    let mut outcomes = BTreeMap::new();
    for file in &files {
        if let Some(summary) = &file.summary {
            summaries.insert(file.file_id.clone(), summary.clone());
            if let Some(outcome) = &file.outcome {
                outcomes.insert(file.file_id.clone(), outcome.clone());
            }
        }
    }

    let comparison = config.outcomes.comparator().compare(&summaries, &outcomes);
    let failed = files.iter().filter(|f| f.summary.is_none()).count();
    if failed > 0 {
        log::warn!("{} capture(s) could not be analyzed", failed);
    }

    let report = CorpusReport {
        generated_at: report::generated_at(),
        files,
        comparison,
    };

    if json {
        println!("{}", report::to_json(&report)?);
    } else {
        report::write_corpus(&mut io::stdout().lock(), &report)?;
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use outcome::CaptureCategory;

    #[test]
    fn test_parse_hex_arguments() {
        assert_eq!(parse_hex_id("0x131"), Ok(0x131));
        assert_eq!(parse_hex_id("131"), Ok(0x131));
        assert!(parse_hex_id("zz").is_err());

        let args = ["93 83".to_string(), "0x02".to_string(), "1FF".to_string()];
        let bytes = parse_hex_bytes(&args).unwrap();
        assert_eq!(bytes, vec![0x93, 0x83, 0x02, 0x1FF]);
        assert!(parse_hex_bytes(&["G1".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args =
            Args::try_parse_from(["can-trace", "message", "131", "93", "83", "--json"]).unwrap();
        assert!(args.json);
        assert!(matches!(
            args.command,
            Command::Message { can_id: 0x131, ref bytes } if bytes.len() == 2
        ));

        let args = Args::try_parse_from(["can-trace", "-vv", "compare", "-d", "captures"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Command::Compare { directory: Some(_), .. }));
    }

    #[test]
    fn test_analyze_file_reports_unreadable_file() {
        let decoder = Decoder::builtin().unwrap();
        let classifier = StateClassifier::builtin().unwrap();
        let path = Path::new("/nonexistent/131.csv");
        let report = analyze_file(path, &decoder, &classifier, &AppConfig::default());
        assert!(report.summary.is_none());
        assert!(report.error.is_some());
    }

    #[test]
    fn test_sensors_off_capture_stays_out_of_sound_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("131 wyloczony czujniki.csv");
        std::fs::write(
            &path,
            "Time Stamp,ID,Extended,Dir,Bus,LEN,D1,D2,D3,D4,D5,D6,D7,D8,\n\
             0.00,00000131,false,Rx,0,8,10,02,00,00,00,00,00,00,\n",
        )
        .unwrap();

        let decoder = Decoder::builtin().unwrap();
        let classifier = StateClassifier::builtin().unwrap();
        let report = analyze_file(&path, &decoder, &classifier, &AppConfig::default());

        assert_eq!(report.category, CaptureCategory::Disabled);
        assert_eq!(report.outcome, None);
        assert!(report.summary.is_some());
    }

    #[test]
    fn test_analyze_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("131 cofanie brak dzwieku.csv");
        std::fs::write(
            &path,
            "Time Stamp,ID,Extended,Dir,Bus,LEN,D1,D2,D3,D4,D5,D6,D7,D8,\n\
             0.00,00000131,false,Rx,0,8,93,83,00,00,00,00,00,00,\n\
             0.02,00000131,false,Rx,0,8,93,83,00,00,00,00,02,E0,\n\
             0.04,000003A0,false,Rx,0,2,01,02,,,,,,,\n\
             junk\n",
        )
        .unwrap();

        let decoder = Decoder::builtin().unwrap();
        let classifier = StateClassifier::builtin().unwrap();
        let report = analyze_file(&path, &decoder, &classifier, &AppConfig::default());

        assert_eq!(report.category, CaptureCategory::Detecting);
        assert_eq!(report.outcome.as_deref(), Some("without sound"));
        assert_eq!(report.reader_errors.len(), 1);
        let summary = report.summary.unwrap();
        assert_eq!(summary.classified_records, 2);
        assert_eq!(summary.unmatched_records, 1);
        assert_eq!(summary.beeper_requests, 1);
    }
}
