//! Configuration loading and parsing
//!
//! Every section of `config.toml` is optional; a missing file section falls
//! back to the built-in defaults.

use crate::outcome::OutcomeConfig;
use anyhow::{Context, Result};
use can_trace_decoder::{
    builtin_registry, builtin_rules, AnalyzerConfig, Decoder, Rule, RuleTable, SchemaDefinition,
    SignalSchema, StateClassifier,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub analysis: AnalyzerConfig,
    #[serde(default)]
    pub outcomes: OutcomeConfig,
    /// Extra message layouts on top of the built-in ones
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
    /// Extra rules, evaluated after the built-in rules of the same CAN ID
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default)]
    pub files: Vec<PathBuf>,
    pub directory: Option<PathBuf>,
    /// Substring a file name must contain to be picked up from `directory`
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            directory: None,
            pattern: default_pattern(),
        }
    }
}

fn default_pattern() -> String {
    "131".to_string()
}

impl InputConfig {
    /// Explicit files followed by matching `.csv` files of `directory`, sorted
    pub fn resolve_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = self.files.clone();

        if let Some(dir) = &self.directory {
            let entries = fs::read_dir(dir)
                .with_context(|| format!("Failed to read input directory: {:?}", dir))?;

            let mut found = Vec::new();
            for entry in entries {
                let path = entry
                    .with_context(|| format!("Failed to list input directory: {:?}", dir))?
                    .path();
                if self.matches(&path) {
                    found.push(path);
                }
            }
            found.sort();
            log::debug!("Found {} capture(s) in {:?}", found.len(), dir);
            files.extend(found);
        }

        // A capture named on the command line may also sit in the directory
        let mut seen = HashSet::new();
        files.retain(|path| {
            let key = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            let first = seen.insert(key);
            if !first {
                log::debug!("Skipping duplicate capture {:?}", path);
            }
            first
        });

        Ok(files)
    }

    fn matches(&self, path: &Path) -> bool {
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        let name_matches = path
            .file_name()
            .map(|name| name.to_string_lossy().contains(&self.pattern))
            .unwrap_or(false);
        path.is_file() && is_csv && name_matches
    }
}

impl AppConfig {
    /// Decoder over the built-in schemas plus the configured ones
    ///
    /// Schema mistakes are reported here, before any capture is read.
    pub fn build_decoder(&self) -> Result<Decoder> {
        let mut registry = builtin_registry()
            .context("Built-in schema registry is invalid")?
            .as_ref()
            .clone();

        for definition in &self.schemas {
            let schema = SignalSchema::try_from(definition.clone())
                .with_context(|| format!("Invalid schema '{}' in configuration", definition.name))?;
            registry
                .register(schema)
                .with_context(|| format!("Cannot register schema '{}'", definition.name))?;
        }

        Ok(Decoder::with_registry(registry))
    }

    /// Classifier over the built-in rules plus the configured ones, validated
    /// against the decoder's registry
    pub fn build_classifier(&self, decoder: &Decoder) -> Result<StateClassifier> {
        let rules = RuleTable::clone(&builtin_rules()).with_rules(self.rules.iter().cloned());
        rules
            .validate(decoder.registry())
            .context("Invalid classification rules")?;
        Ok(StateClassifier::new(rules))
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_trace_decoder::{ClassifiedState, Expected};
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            files = ["131 trace.csv"]

            [analysis]
            require_non_empty = true
            message_filter = [0x131]

            [outcomes]
            without_sound_markers = ["brak dzwieku", "silent"]

            [[schemas]]
            can_id = 0x3A0
            name = "Gear"
            expected_length = 2
            fields = [
                { name = "reverse", byte_index = 0, bit_offset = 2, bit_width = 1 },
            ]

            [[rules]]
            can_id = 0x131
            state = "ActiveLeft"
            conditions = [
                { signal = "system_active", equals = true },
                { signal = "side_select", equals = false },
            ]
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.files.len(), 1);
        assert_eq!(config.input.pattern, "131");
        assert!(config.analysis.require_non_empty);
        assert_eq!(config.analysis.message_filter, Some(vec![0x131]));
        assert_eq!(config.outcomes.without_sound_markers.len(), 2);
        assert_eq!(config.schemas[0].can_id, 0x3A0);
        assert_eq!(config.rules[0].state, ClassifiedState::Custom("ActiveLeft".into()));
        assert_eq!(config.rules[0].conditions[0].equals, Expected::Flag(true));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.input.files.is_empty());
        assert!(config.schemas.is_empty());
        assert_eq!(config.analysis, AnalyzerConfig::default());
    }

    #[test]
    fn test_build_decoder_and_classifier() {
        let config: AppConfig = toml::from_str(
            r#"
            [[schemas]]
            can_id = 0x3A0
            name = "Gear"
            expected_length = 1
            fields = [{ name = "reverse", byte_index = 0, bit_offset = 2, bit_width = 1 }]

            [[rules]]
            can_id = 0x3A0
            state = "Reverse"
            conditions = [{ signal = "reverse", equals = true }]
            "#,
        )
        .unwrap();

        let decoder = config.build_decoder().unwrap();
        assert_eq!(decoder.registry_stats().num_schemas, 2);

        let classifier = config.build_classifier(&decoder).unwrap();
        let msg = decoder.decode(0x3A0, &[0x04]).unwrap();
        assert_eq!(classifier.classify(&msg), ClassifiedState::Custom("Reverse".into()));
    }

    #[test]
    fn test_invalid_schema_fails_at_startup() {
        let config: AppConfig = toml::from_str(
            r#"
            [[schemas]]
            can_id = 0x3A0
            name = "Broken"
            expected_length = 1
            fields = [{ name = "wide", byte_index = 0, bit_offset = 6, bit_width = 4 }]
            "#,
        )
        .unwrap();

        assert!(config.build_decoder().is_err());
    }

    #[test]
    fn test_rule_for_unknown_signal_is_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [[rules]]
            can_id = 0x131
            state = "Odd"
            conditions = [{ signal = "missing", equals = 1 }]
            "#,
        )
        .unwrap();

        let decoder = config.build_decoder().unwrap();
        assert!(config.build_classifier(&decoder).is_err());
    }

    #[test]
    fn test_resolve_files_filters_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["131 parking.csv", "131 notes.txt", "200 other.csv"] {
            let mut file = fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "Time Stamp,ID").unwrap();
        }

        let input = InputConfig {
            directory: Some(dir.path().to_path_buf()),
            ..InputConfig::default()
        };
        let files = input.resolve_files().unwrap();
        assert_eq!(files, vec![dir.path().join("131 parking.csv")]);
    }

    #[test]
    fn test_resolve_files_drops_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("131 parking.csv");
        fs::write(&capture, "Time Stamp,ID\n").unwrap();

        let input = InputConfig {
            files: vec![
                capture.clone(),
                dir.path().join(".").join("131 parking.csv"),
                PathBuf::from("/nonexistent/131.csv"),
                PathBuf::from("/nonexistent/131.csv"),
            ],
            directory: Some(dir.path().to_path_buf()),
            ..InputConfig::default()
        };
        let files = input.resolve_files().unwrap();
        assert_eq!(files, vec![capture, PathBuf::from("/nonexistent/131.csv")]);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[input]\npattern = \"305\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.input.pattern, "305");
        assert!(load_config(Path::new("/nonexistent/config.toml")).is_err());
    }
}
