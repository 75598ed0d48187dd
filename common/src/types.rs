//! Outbound state payloads. The node publishes small partial JSON objects
//! as individual values change, and a full snapshot on request (also used
//! as the MQTT last-will body via [`StateDelta::NodeOnline`]).

use serde::Serialize;
use serde_json::{json, Value};

use crate::interval::{Weekday, WeekSchedule};
use crate::thermostat::HeatingSettings;

/// One incremental state publication.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    /// Latest validated sensor reading.
    Reading { temperature: f32, humidity: f32 },
    TargetTemp(f32),
    BaseTemp(f32),
    DeltaTemp(f32),
    MainSwitch(bool),
    ProgSwitch(bool),
    /// Relay state.
    HeatingOn(bool),
    NodeOnline(bool),
    /// Sensor health after the last measurement attempt.
    SensorOk(bool),
    /// Rendered weekly program, one entry per day starting Sunday.
    WeekProgram(Box<[String; 7]>),
}

impl StateDelta {
    pub fn week_program(week: &WeekSchedule) -> Self {
        let rendered = Weekday::ALL.map(|day| week.day(day).render());
        Self::WeekProgram(Box::new(rendered))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Reading {
                temperature,
                humidity,
            } => json!({ "currentTemp": temperature, "currentHumi": humidity }),
            Self::TargetTemp(temp) => json!({ "targetTemp": temp }),
            Self::BaseTemp(temp) => json!({ "baseTemp": temp }),
            Self::DeltaTemp(delta) => json!({ "deltaTemp": delta }),
            Self::MainSwitch(on) => json!({ "mainSwitch": on }),
            Self::ProgSwitch(on) => json!({ "progSwitch": on }),
            Self::HeatingOn(on) => json!({ "thermoOn": on }),
            Self::NodeOnline(online) => json!({ "nodeOnline": online }),
            Self::SensorOk(ok) => json!({ "dhtOk": ok }),
            Self::WeekProgram(days) => {
                let mut object = serde_json::Map::new();
                for (day, rendered) in Weekday::ALL.iter().zip(days.iter()) {
                    object.insert(day.json_key().to_string(), Value::from(rendered.clone()));
                }
                Value::Object(object)
            }
        }
    }
}

/// The full node state, published on `updateRequest` and on reconnect.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: f32,
    #[serde(rename = "currentHumi")]
    pub current_humi: f32,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    #[serde(rename = "baseTemp")]
    pub base_temp: f32,
    #[serde(rename = "deltaTemp")]
    pub delta_temp: f32,
    #[serde(rename = "mainSwitch")]
    pub main_switch: bool,
    #[serde(rename = "progSwitch")]
    pub prog_switch: bool,
    #[serde(rename = "thermoOn")]
    pub thermo_on: bool,
    #[serde(rename = "nodeOnline")]
    pub node_online: bool,
    #[serde(rename = "dhtOk")]
    pub sensor_ok: bool,
    #[serde(rename = "sundayProg")]
    pub sunday_prog: String,
    #[serde(rename = "mondayProg")]
    pub monday_prog: String,
    #[serde(rename = "tuesdayProg")]
    pub tuesday_prog: String,
    #[serde(rename = "wednesdayProg")]
    pub wednesday_prog: String,
    #[serde(rename = "thursdayProg")]
    pub thursday_prog: String,
    #[serde(rename = "fridayProg")]
    pub friday_prog: String,
    #[serde(rename = "saturdayProg")]
    pub saturday_prog: String,
}

impl NodeStatus {
    pub fn collect(
        current_temp: f32,
        current_humi: f32,
        settings: &HeatingSettings,
        thermo_on: bool,
        node_online: bool,
        sensor_ok: bool,
        week: &WeekSchedule,
    ) -> Self {
        Self {
            current_temp,
            current_humi,
            target_temp: settings.target_temp,
            base_temp: settings.base_temp,
            delta_temp: settings.delta_temp,
            main_switch: settings.main_switch,
            prog_switch: settings.prog_switch,
            thermo_on,
            node_online,
            sensor_ok,
            sunday_prog: week.day(Weekday::Sun).render(),
            monday_prog: week.day(Weekday::Mon).render(),
            tuesday_prog: week.day(Weekday::Tue).render(),
            wednesday_prog: week.day(Weekday::Wed).render(),
            thursday_prog: week.day(Weekday::Thu).render(),
            friday_prog: week.day(Weekday::Fri).render(),
            saturday_prog: week.day(Weekday::Sat).render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deltas_use_dashboard_wire_keys() {
        assert_eq!(
            StateDelta::Reading {
                temperature: 21.0,
                humidity: 50.0,
            }
            .to_json(),
            json!({ "currentTemp": 21.0, "currentHumi": 50.0 })
        );
        assert_eq!(
            StateDelta::HeatingOn(true).to_json(),
            json!({ "thermoOn": true })
        );
        assert_eq!(
            StateDelta::SensorOk(false).to_json(),
            json!({ "dhtOk": false })
        );
        assert_eq!(
            StateDelta::NodeOnline(false).to_json(),
            json!({ "nodeOnline": false })
        );
    }

    #[test]
    fn week_program_delta_has_one_key_per_day() {
        let mut week = WeekSchedule::new();
        assert!(week.day_mut(Weekday::Mon).insert("08:00:00", "10:00:00"));

        let value = StateDelta::week_program(&week).to_json();
        let object = value.as_object().expect("object payload");

        assert_eq!(object.len(), 7);
        assert_eq!(object["mondayProg"], "08:00/10:00");
        assert_eq!(object["sundayProg"], "");
    }

    #[test]
    fn snapshot_serializes_with_dashboard_keys() {
        let week = WeekSchedule::new();
        let status = NodeStatus::collect(
            21.5,
            48.0,
            &HeatingSettings::default(),
            false,
            true,
            true,
            &week,
        );

        let value = serde_json::to_value(&status).expect("serializable");
        assert_eq!(value["currentTemp"], 21.5);
        assert_eq!(value["targetTemp"], 20.0);
        assert_eq!(value["baseTemp"], 12.0);
        assert_eq!(value["mainSwitch"], false);
        assert_eq!(value["nodeOnline"], true);
        assert_eq!(value["dhtOk"], true);
        assert_eq!(value["saturdayProg"], "");
    }
}
