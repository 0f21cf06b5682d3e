//! Park Distance Control (PDC) message 0x131
//!
//! The one fully characterized message: 8 bytes, status flags in byte 0,
//! mode byte 1, beeper request in byte 6 and alarm level in byte 7. Bytes 2-5
//! carry no decoded signal (mostly zero in recorded captures).
//!
//! Observed patterns:
//! - `10 02 .. 00 00` sensors off
//! - `93 83 .. 00 00` sensors on, nothing detected
//! - `93 83 .. 02 E0` obstacle, beeper requested
//!
//! Front and rear captures both show `93 83` in bytes 0-1, so no rule tries
//! to tell them apart.

use crate::classifier::{ClassifiedState, Condition, Rule};
use crate::signals::{BitFieldSpec, SignalSchema};
use crate::types::{DecodedMessage, Result};

/// PDC arbitration ID
pub const PDC_CAN_ID: u32 = 0x131;

/// PDC payload length
pub const PDC_PAYLOAD_LEN: usize = 8;

pub const SYSTEM_ACTIVE: &str = "system_active";
pub const SIDE_SELECT: &str = "side_select";
pub const SENSOR_INDEX: &str = "sensor_index";
pub const MODE_FLAGS: &str = "mode_flags";
pub const BEEPER_REQUEST: &str = "beeper_request";
pub const ALARM_LEVEL: &str = "alarm_level";

pub const MODE_STANDBY: &str = "standby";
pub const MODE_OPERATIONAL: &str = "operational";
pub const BEEPER_NONE: &str = "none";
pub const BEEPER_REQUESTED: &str = "requested";
pub const ALARM_INACTIVE: &str = "inactive";
pub const ALARM_ACTIVE: &str = "active";

/// Signal schema of message 0x131
pub fn schema() -> Result<SignalSchema> {
    SignalSchema::new(
        PDC_CAN_ID,
        "PDC_Status",
        PDC_PAYLOAD_LEN,
        vec![
            BitFieldSpec::flag(SYSTEM_ACTIVE, 0, 7),
            BitFieldSpec::flag(SIDE_SELECT, 0, 4),
            BitFieldSpec::new(SENSOR_INDEX, 0, 0, 2),
            BitFieldSpec::byte(MODE_FLAGS, 1)
                .with_enum([(0x02, MODE_STANDBY), (0x83, MODE_OPERATIONAL)]),
            BitFieldSpec::byte(BEEPER_REQUEST, 6)
                .with_enum([(0x00, BEEPER_NONE), (0x02, BEEPER_REQUESTED)]),
            BitFieldSpec::byte(ALARM_LEVEL, 7)
                .with_enum([(0x00, ALARM_INACTIVE), (0xE0, ALARM_ACTIVE)]),
        ],
    )
}

/// Classification rules of message 0x131, most specific first
pub fn rules() -> Vec<Rule> {
    vec![
        // Disabled signature: byte 0 = 0x10, byte 1 = 0x02, no alarm activity
        Rule::new(
            PDC_CAN_ID,
            ClassifiedState::Disabled,
            vec![
                Condition::flag(SYSTEM_ACTIVE, false),
                Condition::flag(SIDE_SELECT, true),
                Condition::raw(SENSOR_INDEX, 0),
                Condition::label(MODE_FLAGS, MODE_STANDBY),
                Condition::label(BEEPER_REQUEST, BEEPER_NONE),
                Condition::label(ALARM_LEVEL, ALARM_INACTIVE),
            ],
        ),
        Rule::new(
            PDC_CAN_ID,
            ClassifiedState::EnabledIdle,
            vec![
                Condition::flag(SYSTEM_ACTIVE, true),
                Condition::label(BEEPER_REQUEST, BEEPER_NONE),
                Condition::label(ALARM_LEVEL, ALARM_INACTIVE),
            ],
        ),
        Rule::new(
            PDC_CAN_ID,
            ClassifiedState::ObstacleDetected,
            vec![
                Condition::flag(SYSTEM_ACTIVE, true),
                Condition::label(BEEPER_REQUEST, BEEPER_REQUESTED),
                Condition::label(ALARM_LEVEL, ALARM_ACTIVE),
            ],
        ),
        Rule::new(
            PDC_CAN_ID,
            ClassifiedState::ObstacleDetectedNoBeeper,
            vec![
                Condition::flag(SYSTEM_ACTIVE, true),
                Condition::label(ALARM_LEVEL, ALARM_ACTIVE),
                Condition::label(BEEPER_REQUEST, BEEPER_NONE),
            ],
        ),
    ]
}

/// True if the message is a 0x131 frame requesting the beeper
pub fn is_beeper_request(message: &DecodedMessage) -> bool {
    message.can_id == PDC_CAN_ID
        && message
            .signal(BEEPER_REQUEST)
            .and_then(|v| v.as_label())
            == Some(BEEPER_REQUESTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RuleTable;
    use crate::signals::SchemaRegistry;

    #[test]
    fn test_schema_layout() {
        let schema = schema().unwrap();
        assert_eq!(schema.can_id(), 0x131);
        assert_eq!(schema.expected_length(), 8);

        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![SYSTEM_ACTIVE, SIDE_SELECT, SENSOR_INDEX, MODE_FLAGS, BEEPER_REQUEST, ALARM_LEVEL]
        );

        let alarm = schema.field(ALARM_LEVEL).unwrap();
        assert_eq!(alarm.byte_index, 7);
        assert_eq!(alarm.label_for(0xE0), Some(ALARM_ACTIVE));
    }

    #[test]
    fn test_rules_are_consistent_with_schema() {
        let registry = SchemaRegistry::new().with_schema(schema().unwrap()).unwrap();
        let table = RuleTable::new().with_rules(rules());
        table.validate(&registry).unwrap();
        assert_eq!(table.rules_for(PDC_CAN_ID).len(), 4);
    }
}
