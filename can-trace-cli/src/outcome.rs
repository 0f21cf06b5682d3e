//! Declared outcome of a capture
//!
//! Captures are recorded with the test conditions in their file name
//! (e.g. `131 wyloczony czujniki.csv`, `131 cofanie brak dzwieku.csv`). The
//! name puts a capture in a category: sensors switched off, sensors switched
//! on with nothing to detect, or an obstacle run. Only obstacle runs carry an
//! audible outcome; explicit per-file overrides take precedence.

use can_trace_decoder::comparator::{CorpusComparator, WITHOUT_SOUND, WITH_SOUND};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Test condition a capture was recorded under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureCategory {
    /// Parking sensors switched off
    Disabled,
    /// Sensors switched on, no obstacle run
    Enabled,
    /// Obstacle approach; the beeper is expected
    Detecting,
}

impl fmt::Display for CaptureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureCategory::Disabled => write!(f, "disabled"),
            CaptureCategory::Enabled => write!(f, "enabled"),
            CaptureCategory::Detecting => write!(f, "detecting"),
        }
    }
}

/// Category and outcome derived for one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declared {
    pub category: CaptureCategory,
    /// `None` keeps the capture out of the sound comparison
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutcomeConfig {
    /// Case-insensitive file name substrings of captures with sensors off
    #[serde(default = "default_disabled_markers")]
    pub disabled_markers: Vec<String>,
    /// Case-insensitive file name substrings of captures with sensors on and idle
    #[serde(default = "default_enabled_markers")]
    pub enabled_markers: Vec<String>,
    /// Case-insensitive file name substrings meaning "no sound was heard"
    #[serde(default = "default_without_sound_markers")]
    pub without_sound_markers: Vec<String>,
    #[serde(default = "default_with_sound")]
    pub with_sound_label: String,
    #[serde(default = "default_without_sound")]
    pub without_sound_label: String,
    /// File name -> outcome label; an empty label leaves the file unlabeled
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

fn default_disabled_markers() -> Vec<String> {
    vec!["wyloczony".to_string()]
}

fn default_enabled_markers() -> Vec<String> {
    vec!["wloczony".to_string()]
}

fn default_without_sound_markers() -> Vec<String> {
    vec!["brak dzwieku".to_string()]
}

fn default_with_sound() -> String {
    WITH_SOUND.to_string()
}

fn default_without_sound() -> String {
    WITHOUT_SOUND.to_string()
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            disabled_markers: default_disabled_markers(),
            enabled_markers: default_enabled_markers(),
            without_sound_markers: default_without_sound_markers(),
            with_sound_label: default_with_sound(),
            without_sound_label: default_without_sound(),
            overrides: BTreeMap::new(),
        }
    }
}

fn contains_any(name: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|marker| name.contains(&marker.to_lowercase()))
}

impl OutcomeConfig {
    /// Test condition of a capture, from its file name
    pub fn category_for(&self, path: &Path) -> CaptureCategory {
        let lower = file_name(path).to_lowercase();
        if contains_any(&lower, &self.disabled_markers) {
            CaptureCategory::Disabled
        } else if contains_any(&lower, &self.enabled_markers) {
            CaptureCategory::Enabled
        } else {
            CaptureCategory::Detecting
        }
    }

    /// Category and declared outcome of a capture
    ///
    /// Disabled and enabled captures get no outcome unless overridden: no
    /// sound is expected from them, so they say nothing about the beeper.
    pub fn declare(&self, path: &Path) -> Declared {
        let name = file_name(path);
        let category = self.category_for(path);

        if let Some(label) = self.overrides.get(&name) {
            log::debug!("Outcome of '{}' overridden to '{}'", name, label);
            return Declared {
                category,
                outcome: (!label.is_empty()).then(|| label.clone()),
            };
        }

        let outcome = match category {
            CaptureCategory::Disabled | CaptureCategory::Enabled => None,
            CaptureCategory::Detecting => {
                let silent = contains_any(&name.to_lowercase(), &self.without_sound_markers);
                Some(if silent {
                    self.without_sound_label.clone()
                } else {
                    self.with_sound_label.clone()
                })
            }
        };

        Declared { category, outcome }
    }

    /// Comparator that applies the outcome checks with these labels
    pub fn comparator(&self) -> CorpusComparator {
        CorpusComparator::new(&self.with_sound_label, &self.without_sound_label)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declare(name: &str) -> Declared {
        OutcomeConfig::default().declare(Path::new(name))
    }

    #[test]
    fn test_marker_in_file_name() {
        let silent = declare("data/131 cofanie Brak Dzwieku.csv");
        assert_eq!(silent.category, CaptureCategory::Detecting);
        assert_eq!(silent.outcome, Some(WITHOUT_SOUND.to_string()));

        let audible = declare("data/131 przód 5 cm prawy 1.csv");
        assert_eq!(audible.category, CaptureCategory::Detecting);
        assert_eq!(audible.outcome, Some(WITH_SOUND.to_string()));
    }

    #[test]
    fn test_disabled_and_enabled_captures_have_no_sound_outcome() {
        let off = declare("131 wyloczony czujniki.csv");
        assert_eq!(off.category, CaptureCategory::Disabled);
        assert_eq!(off.outcome, None);

        let on = declare("131 wloczony czujniki.csv");
        assert_eq!(on.category, CaptureCategory::Enabled);
        assert_eq!(on.outcome, None);

        // Category wins over the sound marker, as when sorting the captures by hand
        let off_silent = declare("131 WYLOCZONY brak dzwieku.csv");
        assert_eq!(off_silent.category, CaptureCategory::Disabled);
        assert_eq!(off_silent.outcome, None);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = OutcomeConfig::default();
        config
            .overrides
            .insert("131 brak dzwieku.csv".to_string(), "with sound".to_string());
        config.overrides.insert("131 test.csv".to_string(), String::new());
        config
            .overrides
            .insert("131 wloczony.csv".to_string(), "without sound".to_string());

        assert_eq!(
            config.declare(Path::new("131 brak dzwieku.csv")).outcome,
            Some("with sound".to_string())
        );
        assert_eq!(config.declare(Path::new("131 test.csv")).outcome, None);

        let on = config.declare(Path::new("131 wloczony.csv"));
        assert_eq!(on.category, CaptureCategory::Enabled);
        assert_eq!(on.outcome, Some("without sound".to_string()));
    }

    #[test]
    fn test_custom_labels() {
        let config = OutcomeConfig {
            without_sound_markers: vec!["silent".to_string()],
            with_sound_label: "beep".to_string(),
            without_sound_label: "quiet".to_string(),
            ..OutcomeConfig::default()
        };
        assert_eq!(
            config.declare(Path::new("SILENT run.csv")).outcome,
            Some("quiet".to_string())
        );
        assert_eq!(
            config.declare(Path::new("run.csv")).outcome,
            Some("beep".to_string())
        );
    }

    #[test]
    fn test_markers_from_toml() {
        let config: OutcomeConfig = toml::from_str(r#"disabled_markers = ["off"]"#).unwrap();
        assert_eq!(
            config.category_for(Path::new("131 OFF.csv")),
            CaptureCategory::Disabled
        );
        assert_eq!(
            config.category_for(Path::new("131 wyloczony.csv")),
            CaptureCategory::Detecting
        );
        assert_eq!(config.enabled_markers, default_enabled_markers());
    }
}
