//! State classification
//!
//! Maps a decoded message to exactly one [`ClassifiedState`] using ordered,
//! first-match rules. Rules are plain data keyed by CAN ID: supporting a new
//! message or state means adding rules, not code.

use crate::pdc;
use crate::signals::SchemaRegistry;
use crate::types::{DecodedMessage, DecodedSignal, DecoderError, Result, SignalValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Recognized system states
///
/// Serialized as a plain string so states can key JSON objects and appear
/// verbatim in configuration files. Names other than the built-in ones become
/// [`ClassifiedState::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ClassifiedState {
    /// Parking sensors switched off
    Disabled,
    /// Sensors on, nothing detected
    EnabledIdle,
    /// Obstacle detected and the beeper requested
    ObstacleDetected,
    /// Obstacle alarm active but no beeper request on the bus
    ObstacleDetectedNoBeeper,
    /// No rule matched; the decoded signals need manual inspection
    Unknown,
    /// State introduced by a configured rule table
    Custom(String),
}

impl ClassifiedState {
    pub fn as_str(&self) -> &str {
        match self {
            ClassifiedState::Disabled => "Disabled",
            ClassifiedState::EnabledIdle => "EnabledIdle",
            ClassifiedState::ObstacleDetected => "ObstacleDetected",
            ClassifiedState::ObstacleDetectedNoBeeper => "ObstacleDetectedNoBeeper",
            ClassifiedState::Unknown => "Unknown",
            ClassifiedState::Custom(name) => name,
        }
    }
}

impl fmt::Display for ClassifiedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ClassifiedState {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Disabled" => ClassifiedState::Disabled,
            "EnabledIdle" => ClassifiedState::EnabledIdle,
            "ObstacleDetected" => ClassifiedState::ObstacleDetected,
            "ObstacleDetectedNoBeeper" => ClassifiedState::ObstacleDetectedNoBeeper,
            "Unknown" => ClassifiedState::Unknown,
            _ => ClassifiedState::Custom(name),
        }
    }
}

impl From<ClassifiedState> for String {
    fn from(state: ClassifiedState) -> Self {
        match state {
            ClassifiedState::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for ClassifiedState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ClassifiedState::from(s.to_string()))
    }
}

/// Value a condition expects a signal to have
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    /// Single-bit flag
    Flag(bool),
    /// Raw extracted bits
    Raw(u64),
    /// Enumeration label
    Label(String),
}

impl Expected {
    /// Check a decoded signal against this expectation
    pub fn matches(&self, signal: &DecodedSignal) -> bool {
        match self {
            Expected::Flag(want) => signal.value == SignalValue::Boolean(*want),
            Expected::Raw(want) => signal.raw_value == Some(*want),
            Expected::Label(want) => signal.value.as_label() == Some(want.as_str()),
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Flag(v) => write!(f, "{}", v),
            Expected::Raw(v) => write!(f, "0x{:02X}", v),
            Expected::Label(label) => write!(f, "\"{}\"", label),
        }
    }
}

/// One `signal == value` test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub signal: String,
    pub equals: Expected,
}

impl Condition {
    pub fn flag(signal: impl Into<String>, value: bool) -> Self {
        Self {
            signal: signal.into(),
            equals: Expected::Flag(value),
        }
    }

    pub fn raw(signal: impl Into<String>, value: u64) -> Self {
        Self {
            signal: signal.into(),
            equals: Expected::Raw(value),
        }
    }

    pub fn label(signal: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            equals: Expected::Label(label.into()),
        }
    }

    /// A missing signal never matches
    pub fn matches(&self, message: &DecodedMessage) -> bool {
        message
            .decoded_signal(&self.signal)
            .map(|signal| self.equals.matches(signal))
            .unwrap_or(false)
    }
}

/// Classification rule: all conditions must hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub can_id: u32,
    pub state: ClassifiedState,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Rule {
    pub fn new(can_id: u32, state: ClassifiedState, conditions: Vec<Condition>) -> Self {
        Self {
            can_id,
            state,
            conditions,
        }
    }

    pub fn matches(&self, message: &DecodedMessage) -> bool {
        message.can_id == self.can_id && self.conditions.iter().all(|c| c.matches(message))
    }
}

/// Ordered rules per CAN ID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: BTreeMap<u32, Vec<Rule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule after all existing rules of its CAN ID
    pub fn push(&mut self, rule: Rule) {
        self.rules.entry(rule.can_id).or_default().push(rule);
    }

    /// Builder method: append rules in order
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        for rule in rules {
            self.push(rule);
        }
        self
    }

    /// Rules for one CAN ID in evaluation order
    pub fn rules_for(&self, can_id: u32) -> &[Rule] {
        self.rules.get(&can_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All rules, by ascending CAN ID and then evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check every rule against the schemas it refers to
    ///
    /// # Errors
    /// `SchemaError` if a rule targets an unregistered CAN ID, names a signal
    /// its schema does not define, or expects a value the field cannot take.
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<()> {
        for rule in self.iter() {
            let schema = registry.get(rule.can_id).ok_or_else(|| {
                DecoderError::SchemaError(format!(
                    "rule for state {} targets unregistered CAN ID 0x{:X}",
                    rule.state, rule.can_id
                ))
            })?;

            for condition in &rule.conditions {
                let field = schema.field(&condition.signal).ok_or_else(|| {
                    DecoderError::SchemaError(format!(
                        "rule for state {} uses unknown signal '{}' of '{}'",
                        rule.state,
                        condition.signal,
                        schema.name()
                    ))
                })?;

                let valid = match &condition.equals {
                    Expected::Flag(_) => field.bit_width == 1 && !field.is_enumerated(),
                    Expected::Raw(raw) => *raw <= crate::bitfield::max_value(field.bit_width),
                    Expected::Label(label) => field.has_label(label),
                };
                if !valid {
                    return Err(DecoderError::SchemaError(format!(
                        "rule for state {} expects {} = {}, which field '{}' can never hold",
                        rule.state, condition.signal, condition.equals, field.name
                    )));
                }
            }
        }
        Ok(())
    }
}

static BUILTIN_RULES: OnceLock<Arc<RuleTable>> = OnceLock::new();

/// The process-wide built-in rule table
pub fn builtin_rules() -> Arc<RuleTable> {
    BUILTIN_RULES
        .get_or_init(|| Arc::new(RuleTable::new().with_rules(pdc::rules())))
        .clone()
}

/// First-match classifier over a rule table
#[derive(Debug, Clone)]
pub struct StateClassifier {
    rules: Arc<RuleTable>,
}

impl StateClassifier {
    /// Create a classifier over an arbitrary rule table
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    /// Classifier over the built-in rule table, validated against the
    /// built-in schema registry
    pub fn builtin() -> Result<Self> {
        let rules = builtin_rules();
        rules.validate(&*crate::signals::builtin_registry()?)?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Classify one decoded message
    ///
    /// The first rule of the message's CAN ID whose conditions all hold wins;
    /// when none holds the state is `Unknown`.
    pub fn classify(&self, message: &DecodedMessage) -> ClassifiedState {
        let state = self
            .rules
            .rules_for(message.can_id)
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.state.clone())
            .unwrap_or(ClassifiedState::Unknown);

        log::debug!(
            "0x{:X} [{}] classified as {}",
            message.can_id,
            message.payload_hex(),
            state
        );
        state
    }
}
