//! Corpus comparison
//!
//! Groups captures by the set of states they show and reports fingerprints
//! that occur with more than one declared real-world outcome: the same CAN
//! behavior, a different audible result. The report states correlations only.
//!
//! The result depends only on the set of `(file_id, summary, outcome)`
//! entries, never on the order they are supplied in, so summaries produced in
//! parallel can be compared directly.

use crate::analyzer::{Fingerprint, TraceSummary};
use crate::classifier::ClassifiedState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome label for captures where the beeper was heard
pub const WITH_SOUND: &str = "with sound";

/// Outcome label for captures where the beeper stayed silent
pub const WITHOUT_SOUND: &str = "without sound";

/// One capture inside a fingerprint group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupMember {
    pub file_id: String,
    pub outcome: String,
}

/// Captures sharing one fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintGroup {
    /// Distinct states, in ascending order
    pub fingerprint: Vec<ClassifiedState>,
    /// Members sorted by file ID
    pub members: Vec<GroupMember>,
}

impl FingerprintGroup {
    /// Distinct outcomes declared for the members
    pub fn outcomes(&self) -> BTreeSet<&str> {
        self.members.iter().map(|m| m.outcome.as_str()).collect()
    }

    pub fn is_discrepant(&self) -> bool {
        self.outcomes().len() > 1
    }
}

/// Identical decoded behavior with differing real-world outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub fingerprint: Vec<ClassifiedState>,
    /// Outcome -> file IDs declaring it
    pub outcomes: BTreeMap<String, Vec<String>>,
}

impl Discrepancy {
    /// All files involved, sorted
    pub fn file_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .outcomes
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Disagreement between a capture's bus data and its declared outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeFlag {
    /// Declared silent, yet the bus carries beeper requests: the request is
    /// sent, so the audio path is the suspect
    BeeperRequestedWithoutSound {
        file_id: String,
        beeper_requests: usize,
    },
    /// Declared audible, yet only alarm-without-beeper frames were seen
    SoundWithoutBeeperRequest { file_id: String },
}

/// Result of comparing a corpus of captures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Every fingerprint group, in ascending fingerprint order
    pub groups: Vec<FingerprintGroup>,
    /// Groups spanning more than one outcome
    pub discrepancies: Vec<Discrepancy>,
    /// Per-capture outcome checks, sorted by file ID
    pub outcome_flags: Vec<OutcomeFlag>,
    /// Captures without a declared outcome, sorted
    pub unlabeled: Vec<String>,
}

impl ComparisonReport {
    pub fn has_discrepancies(&self) -> bool {
        !self.discrepancies.is_empty()
    }

    /// Group containing a given file
    pub fn group_of(&self, file_id: &str) -> Option<&FingerprintGroup> {
        self.groups
            .iter()
            .find(|g| g.members.iter().any(|m| m.file_id == file_id))
    }
}

/// Comparator over declared outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusComparator {
    with_sound: String,
    without_sound: String,
}

impl Default for CorpusComparator {
    fn default() -> Self {
        Self::new(WITH_SOUND, WITHOUT_SOUND)
    }
}

impl CorpusComparator {
    /// Create a comparator using custom outcome labels for the sound checks
    pub fn new(with_sound: impl Into<String>, without_sound: impl Into<String>) -> Self {
        Self {
            with_sound: with_sound.into(),
            without_sound: without_sound.into(),
        }
    }

    /// Compare summaries against declared outcomes
    ///
    /// Both inputs map file IDs to values; any map (or iterator of pairs)
    /// works. Summaries without an outcome are listed as unlabeled.
    pub fn compare<'a, S, O>(&self, summaries: S, outcomes: O) -> ComparisonReport
    where
        S: IntoIterator<Item = (&'a String, &'a TraceSummary)>,
        O: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let outcomes: BTreeMap<&str, &str> = outcomes
            .into_iter()
            .map(|(file, outcome)| (file.as_str(), outcome.as_str()))
            .collect();

        let mut groups: BTreeMap<Fingerprint, BTreeSet<GroupMember>> = BTreeMap::new();
        let mut flags = BTreeMap::new();
        let mut unlabeled = BTreeSet::new();

        for (file_id, summary) in summaries {
            let Some(outcome) = outcomes.get(file_id.as_str()) else {
                log::warn!(
                    "No outcome declared for '{}', leaving it out of the comparison",
                    file_id
                );
                unlabeled.insert(file_id.clone());
                continue;
            };

            if let Some(flag) = self.check_outcome(file_id, summary, outcome) {
                flags.insert(file_id.clone(), flag);
            }

            groups
                .entry(summary.fingerprint())
                .or_default()
                .insert(GroupMember {
                    file_id: file_id.clone(),
                    outcome: outcome.to_string(),
                });
        }

        let groups: Vec<FingerprintGroup> = groups
            .into_iter()
            .map(|(fingerprint, members)| FingerprintGroup {
                fingerprint: fingerprint.into_iter().collect(),
                members: members.into_iter().collect(),
            })
            .collect();

        let discrepancies: Vec<Discrepancy> = groups
            .iter()
            .filter(|g| g.is_discrepant())
            .map(|g| {
                let mut outcomes: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for member in &g.members {
                    outcomes
                        .entry(member.outcome.clone())
                        .or_default()
                        .push(member.file_id.clone());
                }
                Discrepancy {
                    fingerprint: g.fingerprint.clone(),
                    outcomes,
                }
            })
            .collect();

        log::info!(
            "Compared {} labeled capture(s): {} group(s), {} discrepancy(ies), {} outcome flag(s)",
            groups.iter().map(|g| g.members.len()).sum::<usize>(),
            groups.len(),
            discrepancies.len(),
            flags.len()
        );

        ComparisonReport {
            groups,
            discrepancies,
            outcome_flags: flags.into_values().collect(),
            unlabeled: unlabeled.into_iter().collect(),
        }
    }

    fn check_outcome(
        &self,
        file_id: &str,
        summary: &TraceSummary,
        outcome: &str,
    ) -> Option<OutcomeFlag> {
        if outcome == self.without_sound && summary.beeper_requests > 0 {
            Some(OutcomeFlag::BeeperRequestedWithoutSound {
                file_id: file_id.to_string(),
                beeper_requests: summary.beeper_requests,
            })
        } else if outcome == self.with_sound
            && summary.beeper_requests == 0
            && summary.has_state(&ClassifiedState::ObstacleDetectedNoBeeper)
        {
            Some(OutcomeFlag::SoundWithoutBeeperRequest {
                file_id: file_id.to_string(),
            })
        } else {
            None
        }
    }
}

/// Compare with the default outcome labels ("with sound" / "without sound")
pub fn compare<'a, S, O>(summaries: S, outcomes: O) -> ComparisonReport
where
    S: IntoIterator<Item = (&'a String, &'a TraceSummary)>,
    O: IntoIterator<Item = (&'a String, &'a String)>,
{
    CorpusComparator::default().compare(summaries, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TraceLabel;
    use std::collections::HashMap;

    fn summary(
        file_id: &str,
        states: &[(ClassifiedState, usize)],
        beeper_requests: usize,
    ) -> TraceSummary {
        let state_counts: BTreeMap<ClassifiedState, usize> = states.iter().cloned().collect();
        let classified_records = state_counts.values().sum();
        TraceSummary {
            file_id: file_id.to_string(),
            label: if classified_records == 0 {
                TraceLabel::Empty
            } else {
                TraceLabel::Stable
            },
            total_records: classified_records,
            classified_records,
            unmatched_records: 0,
            filtered_records: 0,
            error_count: 0,
            errors: Vec::new(),
            length_mismatches: 0,
            beeper_requests,
            state_counts,
            transitions: Vec::new(),
            unique_patterns: Vec::new(),
            anomalies: Vec::new(),
            first_timestamp: None,
            last_timestamp: None,
            records: Vec::new(),
        }
    }

    type Corpus = (Vec<(String, TraceSummary)>, Vec<(String, String)>);

    fn corpus(entries: &[(&str, TraceSummary, &str)]) -> Corpus {
        let summaries = entries
            .iter()
            .map(|(id, s, _)| (id.to_string(), s.clone()))
            .collect();
        let outcomes = entries
            .iter()
            .map(|(id, _, o)| (id.to_string(), o.to_string()))
            .collect();
        (summaries, outcomes)
    }

    #[test]
    fn test_same_fingerprint_different_outcome() {
        let states = [
            (ClassifiedState::EnabledIdle, 10),
            (ClassifiedState::ObstacleDetected, 4),
        ];
        let mut summaries = HashMap::new();
        summaries.insert("a.csv".to_string(), summary("a.csv", &states, 4));
        let b_states = [
            (ClassifiedState::EnabledIdle, 2),
            (ClassifiedState::ObstacleDetected, 9),
        ];
        summaries.insert("b.csv".to_string(), summary("b.csv", &b_states, 9));

        let mut outcomes = HashMap::new();
        outcomes.insert("a.csv".to_string(), WITH_SOUND.to_string());
        outcomes.insert("b.csv".to_string(), WITHOUT_SOUND.to_string());

        let report = compare(&summaries, &outcomes);

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.discrepancies.len(), 1);
        let discrepancy = &report.discrepancies[0];
        assert_eq!(
            discrepancy.fingerprint,
            vec![ClassifiedState::EnabledIdle, ClassifiedState::ObstacleDetected]
        );
        assert_eq!(discrepancy.file_ids(), vec!["a.csv", "b.csv"]);
        assert_eq!(discrepancy.outcomes[WITHOUT_SOUND], vec!["b.csv".to_string()]);
    }

    #[test]
    fn test_consistent_outcomes_produce_no_discrepancy() {
        let (summaries, outcomes) = corpus(&[
            ("a", summary("a", &[(ClassifiedState::Disabled, 5)], 0), WITH_SOUND),
            ("b", summary("b", &[(ClassifiedState::Disabled, 1)], 0), WITH_SOUND),
            ("c", summary("c", &[(ClassifiedState::ObstacleDetected, 1)], 1), WITHOUT_SOUND),
        ]);
        let report = compare(
            summaries.iter().map(|(k, v)| (k, v)),
            outcomes.iter().map(|(k, v)| (k, v)),
        );

        assert_eq!(report.groups.len(), 2);
        assert!(!report.has_discrepancies());
        assert_eq!(report.group_of("b").unwrap().members.len(), 2);
    }

    #[test]
    fn test_order_does_not_matter() {
        let entries = [
            ("x", summary("x", &[(ClassifiedState::EnabledIdle, 3)], 0), WITH_SOUND),
            ("y", summary("y", &[(ClassifiedState::EnabledIdle, 1)], 0), WITHOUT_SOUND),
            ("z", summary("z", &[(ClassifiedState::ObstacleDetectedNoBeeper, 2)], 0), WITH_SOUND),
        ];
        let (summaries, outcomes) = corpus(&entries);

        let forward = compare(
            summaries.iter().map(|(k, v)| (k, v)),
            outcomes.iter().map(|(k, v)| (k, v)),
        );
        let backward = compare(
            summaries.iter().rev().map(|(k, v)| (k, v)),
            outcomes.iter().rev().map(|(k, v)| (k, v)),
        );

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_unlabeled_files_are_listed() {
        let lost = summary("lost", &[(ClassifiedState::Disabled, 1)], 0);
        let (summaries, _) = corpus(&[("lost", lost, "")]);
        let outcomes: Vec<(String, String)> = Vec::new();
        let report = compare(
            summaries.iter().map(|(k, v)| (k, v)),
            outcomes.iter().map(|(k, v)| (k, v)),
        );

        assert!(report.groups.is_empty());
        assert_eq!(report.unlabeled, vec!["lost".to_string()]);
    }

    #[test]
    fn test_outcome_flags() {
        let (summaries, outcomes) = corpus(&[
            (
                "silent",
                summary("silent", &[(ClassifiedState::ObstacleDetected, 3)], 3),
                WITHOUT_SOUND,
            ),
            (
                "loud",
                summary("loud", &[(ClassifiedState::ObstacleDetectedNoBeeper, 2)], 0),
                WITH_SOUND,
            ),
            (
                "fine",
                summary("fine", &[(ClassifiedState::ObstacleDetected, 3)], 3),
                WITH_SOUND,
            ),
        ]);
        let report = compare(
            summaries.iter().map(|(k, v)| (k, v)),
            outcomes.iter().map(|(k, v)| (k, v)),
        );

        assert_eq!(
            report.outcome_flags,
            vec![
                OutcomeFlag::SoundWithoutBeeperRequest {
                    file_id: "loud".to_string()
                },
                OutcomeFlag::BeeperRequestedWithoutSound {
                    file_id: "silent".to_string(),
                    beeper_requests: 3
                },
            ]
        );
    }

    #[test]
    fn test_custom_outcome_labels() {
        let (summaries, outcomes) = corpus(&[(
            "p",
            summary("p", &[(ClassifiedState::ObstacleDetected, 1)], 1),
            "brak dzwieku",
        )]);
        let comparator = CorpusComparator::new("dzwiek", "brak dzwieku");
        let report = comparator.compare(
            summaries.iter().map(|(k, v)| (k, v)),
            outcomes.iter().map(|(k, v)| (k, v)),
        );
        assert_eq!(report.outcome_flags.len(), 1);
    }
}
