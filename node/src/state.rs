//! Mutable node state shared between the transport and measurement loops.
//! Every mutation returns the state deltas that should go out over MQTT,
//! so both the ESP and host builds publish exactly the same payloads.

use chrono::{DateTime, TimeZone};

use thermo_common::{
    Command, HeatingSettings, NodeStatus, SchedulePairing, StateDelta, ThermostatEngine,
    WeekSchedule,
};

pub struct NodeState {
    engine: ThermostatEngine,
    week: WeekSchedule,
    pairing: SchedulePairing,
    current_temp: f32,
    current_humi: f32,
    sensor_ok: bool,
}

impl NodeState {
    pub fn new(settings: HeatingSettings) -> Self {
        Self {
            engine: ThermostatEngine::new(settings),
            week: WeekSchedule::new(),
            pairing: SchedulePairing::default(),
            current_temp: 0.0,
            current_humi: 0.0,
            sensor_ok: false,
        }
    }

    pub fn record_reading(&mut self, temperature: f32, humidity: f32) -> Vec<StateDelta> {
        self.current_temp = temperature;
        self.current_humi = humidity;

        let mut deltas = vec![StateDelta::Reading {
            temperature,
            humidity,
        }];
        if !self.sensor_ok {
            self.sensor_ok = true;
            deltas.push(StateDelta::SensorOk(true));
        }
        deltas
    }

    /// The last good reading stays in effect while the sensor is down, so
    /// the heating rule keeps running on stale but plausible data.
    pub fn record_sensor_failure(&mut self) -> Vec<StateDelta> {
        if self.sensor_ok {
            self.sensor_ok = false;
            vec![StateDelta::SensorOk(false)]
        } else {
            Vec::new()
        }
    }

    /// Re-runs the heating rule for `now`; `Some` when the relay state
    /// changed and a `thermoOn` delta should go out.
    pub fn evaluate<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Option<StateDelta> {
        let in_interval = self.week.contains_local(now);
        let before = self.engine.is_heating_on();
        let after = self.engine.evaluate(self.current_temp, in_interval);
        (before != after).then_some(StateDelta::HeatingOn(after))
    }

    pub fn is_heating_on(&self) -> bool {
        self.engine.is_heating_on()
    }

    /// Applies one decoded command and returns the deltas to publish.
    /// `UpdateRequest` is not handled here: the caller answers it with a
    /// full [`snapshot`](Self::snapshot) instead of deltas.
    pub fn apply_command(&mut self, command: Command) -> Vec<StateDelta> {
        match command {
            Command::SyncRequest => vec![StateDelta::NodeOnline(true)],
            Command::SetTargetTemp(temp) => {
                if self.engine.set_target_temp(temp) {
                    vec![StateDelta::TargetTemp(temp)]
                } else {
                    Vec::new()
                }
            }
            Command::SetBaseTemp(temp) => {
                if self.engine.set_base_temp(temp) {
                    vec![StateDelta::BaseTemp(temp)]
                } else {
                    Vec::new()
                }
            }
            Command::SetDeltaTemp(delta) => {
                if self.engine.set_delta_temp(delta) {
                    vec![StateDelta::DeltaTemp(delta)]
                } else {
                    Vec::new()
                }
            }
            Command::SetMainSwitch(on) => {
                self.engine.set_main_switch(on);
                vec![StateDelta::MainSwitch(on)]
            }
            Command::SetProgSwitch(on) => {
                self.engine.set_prog_switch(on);
                vec![StateDelta::ProgSwitch(on)]
            }
            Command::ScheduleStart { day, start_time } => {
                self.pairing.begin(day, start_time);
                Vec::new()
            }
            Command::ScheduleEnd { day, end_time } => {
                if let Some(start_time) = self.pairing.complete(day) {
                    if self.week.day_mut(day).insert(&start_time, &end_time) {
                        return vec![StateDelta::week_program(&self.week)];
                    }
                }
                Vec::new()
            }
            Command::ClearDay(day) => {
                self.week.day_mut(day).clear();
                vec![StateDelta::week_program(&self.week)]
            }
            Command::UpdateRequest => Vec::new(),
        }
    }

    pub fn snapshot(&self, node_online: bool) -> NodeStatus {
        NodeStatus::collect(
            self.current_temp,
            self.current_humi,
            self.engine.settings(),
            self.engine.is_heating_on(),
            node_online,
            self.sensor_ok,
            &self.week,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use thermo_common::Weekday;

    use super::*;

    fn state() -> NodeState {
        NodeState::new(HeatingSettings::default())
    }

    #[test]
    fn first_reading_reports_sensor_recovery() {
        let mut state = state();

        let deltas = state.record_reading(21.0, 50.0);
        assert_eq!(
            deltas,
            vec![
                StateDelta::Reading {
                    temperature: 21.0,
                    humidity: 50.0,
                },
                StateDelta::SensorOk(true),
            ]
        );

        // Steady state: only the reading goes out.
        let deltas = state.record_reading(21.5, 49.0);
        assert_eq!(
            deltas,
            vec![StateDelta::Reading {
                temperature: 21.5,
                humidity: 49.0,
            }]
        );
    }

    #[test]
    fn failure_delta_fires_once() {
        let mut state = state();
        assert_eq!(state.record_sensor_failure(), vec![]);

        state.record_reading(21.0, 50.0);
        assert_eq!(
            state.record_sensor_failure(),
            vec![StateDelta::SensorOk(false)]
        );
        assert_eq!(state.record_sensor_failure(), vec![]);
    }

    #[test]
    fn schedule_pair_inserts_into_week_program() {
        let mut state = state();

        let deltas = state.apply_command(Command::ScheduleStart {
            day: Weekday::Mon,
            start_time: "08:00:00".to_string(),
        });
        assert_eq!(deltas, vec![]);

        let deltas = state.apply_command(Command::ScheduleEnd {
            day: Weekday::Mon,
            end_time: "10:00:00".to_string(),
        });
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].to_json()["mondayProg"], "08:00/10:00");
    }

    #[test]
    fn schedule_end_for_other_day_is_dropped() {
        let mut state = state();
        state.apply_command(Command::ScheduleStart {
            day: Weekday::Mon,
            start_time: "08:00:00".to_string(),
        });

        let deltas = state.apply_command(Command::ScheduleEnd {
            day: Weekday::Tue,
            end_time: "10:00:00".to_string(),
        });
        assert_eq!(deltas, vec![]);
    }

    #[test]
    fn clearing_a_day_republishes_the_program() {
        let mut state = state();
        state.apply_command(Command::ScheduleStart {
            day: Weekday::Fri,
            start_time: "06:00:00".to_string(),
        });
        state.apply_command(Command::ScheduleEnd {
            day: Weekday::Fri,
            end_time: "07:00:00".to_string(),
        });

        let deltas = state.apply_command(Command::ClearDay(Weekday::Fri));
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].to_json()["fridayProg"], "");
    }

    #[test]
    fn setting_commands_echo_their_new_value() {
        let mut state = state();

        assert_eq!(
            state.apply_command(Command::SetTargetTemp(22.0)),
            vec![StateDelta::TargetTemp(22.0)]
        );
        assert_eq!(
            state.apply_command(Command::SetMainSwitch(true)),
            vec![StateDelta::MainSwitch(true)]
        );
    }

    #[test]
    fn evaluate_reports_only_relay_transitions() {
        let mut state = state();
        // 2024-01-01 is a Monday.
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap();

        state.record_reading(18.0, 50.0);
        state.apply_command(Command::SetMainSwitch(true));

        assert_eq!(state.evaluate(&now), Some(StateDelta::HeatingOn(true)));
        assert!(state.is_heating_on());
        // No transition on the second evaluation.
        assert_eq!(state.evaluate(&now), None);

        state.record_reading(22.0, 50.0);
        assert_eq!(state.evaluate(&now), Some(StateDelta::HeatingOn(false)));
    }

    #[test]
    fn program_gates_evaluation_by_local_time() {
        let mut state = state();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap();

        state.record_reading(18.0, 50.0);
        state.apply_command(Command::SetMainSwitch(true));
        state.apply_command(Command::SetProgSwitch(true));

        // No scheduled interval covers Monday morning yet.
        assert_eq!(state.evaluate(&now), None);

        state.apply_command(Command::ScheduleStart {
            day: Weekday::Mon,
            start_time: "08:00:00".to_string(),
        });
        state.apply_command(Command::ScheduleEnd {
            day: Weekday::Mon,
            end_time: "09:00:00".to_string(),
        });
        assert_eq!(state.evaluate(&now), Some(StateDelta::HeatingOn(true)));
    }

    #[test]
    fn snapshot_reflects_current_state() {
        let mut state = state();
        state.record_reading(21.0, 50.0);
        state.apply_command(Command::SetTargetTemp(23.0));

        let snapshot = state.snapshot(true);
        assert_eq!(snapshot.current_temp, 21.0);
        assert_eq!(snapshot.target_temp, 23.0);
        assert!(snapshot.node_online);
        assert!(snapshot.sensor_ok);
    }
}
