//! Inbound MQTT command decoding.
//!
//! Commands arrive as small JSON objects carrying one logical field each.
//! Interpretation is first-match in a fixed priority order, and schedule
//! programming is a two-message exchange: a `startTime` for a selected day
//! followed by an `endTime` for the same day.

use serde::Deserialize;

use crate::interval::Weekday;
use crate::thermostat::{
    MAX_BASE_TEMP, MAX_DELTA_TEMP, MAX_TARGET_TEMP, MIN_BASE_TEMP, MIN_DELTA_TEMP,
    MIN_TARGET_TEMP,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandMessage {
    #[serde(rename = "syncRequest")]
    sync_request: Option<bool>,
    #[serde(rename = "targetTemp")]
    target_temp: Option<f32>,
    #[serde(rename = "deltaTemp")]
    delta_temp: Option<f32>,
    #[serde(rename = "mainSwitch")]
    main_switch: Option<bool>,
    #[serde(rename = "progSwitch")]
    prog_switch: Option<bool>,
    #[serde(rename = "startTime")]
    start_time: Option<String>,
    #[serde(rename = "endTime")]
    end_time: Option<String>,
    #[serde(rename = "weekdaySelected")]
    weekday_selected: Option<usize>,
    #[serde(rename = "weekdayClear")]
    weekday_clear: Option<usize>,
    #[serde(rename = "baseTemp")]
    base_temp: Option<f32>,
    #[serde(rename = "updateRequest")]
    update_request: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Asks the node to republish its online status.
    SyncRequest,
    SetTargetTemp(f32),
    SetDeltaTemp(f32),
    SetBaseTemp(f32),
    SetMainSwitch(bool),
    SetProgSwitch(bool),
    /// First half of a schedule insert; the end arrives separately.
    ScheduleStart { day: Weekday, start_time: String },
    ScheduleEnd { day: Weekday, end_time: String },
    ClearDay(Weekday),
    /// Asks for a full state snapshot.
    UpdateRequest,
}

/// Decodes one command payload. Returns `None` for malformed JSON, unknown
/// fields only, or out-of-range values; there is no error reply channel,
/// so bad commands are dropped.
pub fn parse_command(payload: &str) -> Option<Command> {
    let message: CommandMessage = serde_json::from_str(payload).ok()?;

    if message.sync_request == Some(true) {
        return Some(Command::SyncRequest);
    }

    if let Some(temp) = message.target_temp {
        if (MIN_TARGET_TEMP..=MAX_TARGET_TEMP).contains(&temp) {
            return Some(Command::SetTargetTemp(temp));
        }
        return None;
    }

    if let Some(delta) = message.delta_temp {
        if (MIN_DELTA_TEMP..=MAX_DELTA_TEMP).contains(&delta) {
            return Some(Command::SetDeltaTemp(delta));
        }
        return None;
    }

    if let Some(on) = message.main_switch {
        return Some(Command::SetMainSwitch(on));
    }

    if let Some(on) = message.prog_switch {
        return Some(Command::SetProgSwitch(on));
    }

    if let (Some(start_time), Some(day)) = (&message.start_time, message.weekday_selected) {
        if day < 7 {
            return Some(Command::ScheduleStart {
                day: Weekday::from_index(day),
                start_time: start_time.clone(),
            });
        }
        return None;
    }

    if let (Some(end_time), Some(day)) = (&message.end_time, message.weekday_selected) {
        if day < 7 {
            return Some(Command::ScheduleEnd {
                day: Weekday::from_index(day),
                end_time: end_time.clone(),
            });
        }
        return None;
    }

    if let Some(day) = message.weekday_clear {
        if day < 7 {
            return Some(Command::ClearDay(Weekday::from_index(day)));
        }
        return None;
    }

    if let Some(temp) = message.base_temp {
        if (MIN_BASE_TEMP..=MAX_BASE_TEMP).contains(&temp) {
            return Some(Command::SetBaseTemp(temp));
        }
        return None;
    }

    if message.update_request == Some(true) {
        return Some(Command::UpdateRequest);
    }

    None
}

/// Tracks the pending half of the two-message schedule insert. The end
/// only completes the pair when it names the same day as the pending
/// start; anything else discards the pending state.
#[derive(Debug, Default)]
pub struct SchedulePairing {
    pending: Option<(Weekday, String)>,
}

impl SchedulePairing {
    pub fn begin(&mut self, day: Weekday, start_time: String) {
        self.pending = Some((day, start_time));
    }

    /// On a day match, yields the buffered start time and clears the
    /// pending state.
    pub fn complete(&mut self, day: Weekday) -> Option<String> {
        match self.pending.take() {
            Some((pending_day, start_time)) if pending_day == day => Some(start_time),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_each_command_kind() {
        assert_eq!(
            parse_command(r#"{"syncRequest": true}"#),
            Some(Command::SyncRequest)
        );
        assert_eq!(
            parse_command(r#"{"targetTemp": 21.5}"#),
            Some(Command::SetTargetTemp(21.5))
        );
        assert_eq!(
            parse_command(r#"{"deltaTemp": 0.5}"#),
            Some(Command::SetDeltaTemp(0.5))
        );
        assert_eq!(
            parse_command(r#"{"baseTemp": 10}"#),
            Some(Command::SetBaseTemp(10.0))
        );
        assert_eq!(
            parse_command(r#"{"mainSwitch": true}"#),
            Some(Command::SetMainSwitch(true))
        );
        assert_eq!(
            parse_command(r#"{"progSwitch": false}"#),
            Some(Command::SetProgSwitch(false))
        );
        assert_eq!(
            parse_command(r#"{"weekdayClear": 3}"#),
            Some(Command::ClearDay(Weekday::Wed))
        );
        assert_eq!(
            parse_command(r#"{"updateRequest": true}"#),
            Some(Command::UpdateRequest)
        );
    }

    #[test]
    fn decodes_schedule_pair_messages() {
        assert_eq!(
            parse_command(r#"{"weekdaySelected": 1, "startTime": "08:00:00"}"#),
            Some(Command::ScheduleStart {
                day: Weekday::Mon,
                start_time: "08:00:00".to_string(),
            })
        );
        assert_eq!(
            parse_command(r#"{"weekdaySelected": 1, "endTime": "10:00:00"}"#),
            Some(Command::ScheduleEnd {
                day: Weekday::Mon,
                end_time: "10:00:00".to_string(),
            })
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(parse_command(r#"{"targetTemp": 14.9}"#), None);
        assert_eq!(parse_command(r#"{"targetTemp": 31}"#), None);
        assert_eq!(parse_command(r#"{"deltaTemp": 2}"#), None);
        assert_eq!(parse_command(r#"{"baseTemp": 20}"#), None);
        assert_eq!(parse_command(r#"{"weekdayClear": 7}"#), None);
        assert_eq!(
            parse_command(r#"{"weekdaySelected": 9, "startTime": "08:00:00"}"#),
            None
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(parse_command("not json"), None);
        assert_eq!(parse_command("{}"), None);
        assert_eq!(parse_command(r#"{"unknownKey": 1}"#), None);
        assert_eq!(parse_command(r#"{"syncRequest": false}"#), None);
    }

    #[test]
    fn pairing_completes_only_on_matching_day() {
        let mut pairing = SchedulePairing::default();
        pairing.begin(Weekday::Fri, "08:00:00".to_string());

        assert_eq!(pairing.complete(Weekday::Sat), None);
        // The mismatch discarded the pending start.
        assert_eq!(pairing.complete(Weekday::Fri), None);

        pairing.begin(Weekday::Fri, "08:00:00".to_string());
        assert_eq!(pairing.complete(Weekday::Fri), Some("08:00:00".to_string()));
        assert_eq!(pairing.complete(Weekday::Fri), None);
    }
}
