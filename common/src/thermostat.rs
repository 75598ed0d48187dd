//! Heating decision rule: compares the latest reading against the target
//! and the weekly program, with a hysteresis band to avoid relay chatter.

use serde::{Deserialize, Serialize};

pub const MIN_TARGET_TEMP: f32 = 15.0;
pub const MAX_TARGET_TEMP: f32 = 30.0;

pub const MIN_BASE_TEMP: f32 = 5.0;
pub const MAX_BASE_TEMP: f32 = 15.0;

pub const MIN_DELTA_TEMP: f32 = 0.0;
pub const MAX_DELTA_TEMP: f32 = 1.0;

/// User-adjustable thermostat settings, all temperatures in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatingSettings {
    /// Desired room temperature.
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    /// Floor below which heating starts regardless of switches or program.
    #[serde(rename = "baseTemp")]
    pub base_temp: f32,
    /// Overshoot allowed past the target before heating turns off.
    #[serde(rename = "deltaTemp")]
    pub delta_temp: f32,
    /// Master on/off switch for the thermostat.
    #[serde(rename = "mainSwitch")]
    pub main_switch: bool,
    /// Whether the weekly program gates the heating decision.
    #[serde(rename = "progSwitch")]
    pub prog_switch: bool,
}

impl Default for HeatingSettings {
    fn default() -> Self {
        Self {
            target_temp: 20.0,
            base_temp: 12.0,
            delta_temp: 0.2,
            main_switch: false,
            prog_switch: false,
        }
    }
}

impl HeatingSettings {
    /// Clamps every field into its valid range; non-finite values fall
    /// back to the defaults. Applied to configuration before use.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if !self.target_temp.is_finite() {
            self.target_temp = defaults.target_temp;
        }
        if !self.base_temp.is_finite() {
            self.base_temp = defaults.base_temp;
        }
        if !self.delta_temp.is_finite() {
            self.delta_temp = defaults.delta_temp;
        }
        self.target_temp = self.target_temp.clamp(MIN_TARGET_TEMP, MAX_TARGET_TEMP);
        self.base_temp = self.base_temp.clamp(MIN_BASE_TEMP, MAX_BASE_TEMP);
        self.delta_temp = self.delta_temp.clamp(MIN_DELTA_TEMP, MAX_DELTA_TEMP);
    }
}

/// Pure thermostat state machine. Owns the heating on/off latch; the
/// caller owns the relay and applies whatever [`evaluate`](Self::evaluate)
/// returns.
#[derive(Debug, Clone, Default)]
pub struct ThermostatEngine {
    settings: HeatingSettings,
    heating_on: bool,
}

impl ThermostatEngine {
    pub fn new(settings: HeatingSettings) -> Self {
        Self {
            settings,
            heating_on: false,
        }
    }

    pub fn settings(&self) -> &HeatingSettings {
        &self.settings
    }

    pub fn is_heating_on(&self) -> bool {
        self.heating_on
    }

    pub fn set_target_temp(&mut self, temp: f32) -> bool {
        if !temp.is_finite() || !(MIN_TARGET_TEMP..=MAX_TARGET_TEMP).contains(&temp) {
            return false;
        }
        self.settings.target_temp = temp;
        true
    }

    pub fn set_base_temp(&mut self, temp: f32) -> bool {
        if !temp.is_finite() || !(MIN_BASE_TEMP..=MAX_BASE_TEMP).contains(&temp) {
            return false;
        }
        self.settings.base_temp = temp;
        true
    }

    pub fn set_delta_temp(&mut self, delta: f32) -> bool {
        if !delta.is_finite() || !(MIN_DELTA_TEMP..=MAX_DELTA_TEMP).contains(&delta) {
            return false;
        }
        self.settings.delta_temp = delta;
        true
    }

    pub fn set_main_switch(&mut self, on: bool) {
        self.settings.main_switch = on;
    }

    pub fn set_prog_switch(&mut self, on: bool) {
        self.settings.prog_switch = on;
    }

    /// Decides the relay state for the current temperature.
    /// `in_scheduled_interval` is the program's verdict for "now"; it only
    /// matters while the program switch is on.
    pub fn evaluate(&mut self, current_temp: f32, in_scheduled_interval: bool) -> bool {
        let settings = self.settings;
        let schedule_allows = !settings.prog_switch || in_scheduled_interval;

        self.heating_on = if settings.main_switch
            && schedule_allows
            && current_temp < settings.target_temp
        {
            true
        } else if settings.main_switch
            && schedule_allows
            && self.heating_on
            && current_temp <= settings.target_temp + settings.delta_temp
        {
            // Inside the hysteresis band: hold the current on state.
            true
        } else {
            // Below the base floor the heating runs no matter what.
            current_temp < settings.base_temp
        };

        self.heating_on
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn engine(main_switch: bool, prog_switch: bool) -> ThermostatEngine {
        ThermostatEngine::new(HeatingSettings {
            target_temp: 20.0,
            base_temp: 12.0,
            delta_temp: 0.2,
            main_switch,
            prog_switch,
        })
    }

    #[test]
    fn turns_on_below_target_without_program() {
        let mut engine = engine(true, false);
        assert!(engine.evaluate(19.0, false));
        assert!(engine.is_heating_on());
    }

    #[test]
    fn program_gates_heating() {
        let mut engine = engine(true, true);
        assert!(!engine.evaluate(19.0, false));
        assert!(engine.evaluate(19.0, true));
    }

    #[test]
    fn hysteresis_holds_until_delta_exceeded() {
        let mut engine = engine(true, false);
        assert!(engine.evaluate(19.0, false));
        // Past target but within target + delta: stays on.
        assert!(engine.evaluate(20.1, false));
        // Past the band: turns off.
        assert!(!engine.evaluate(20.3, false));
        // Back inside the band while off: stays off.
        assert!(!engine.evaluate(20.1, false));
    }

    #[test]
    fn base_floor_overrides_switches_and_program() {
        let mut main_off = engine(false, false);
        assert!(main_off.evaluate(11.9, false));

        let mut gated = engine(true, true);
        assert!(gated.evaluate(11.9, false));
    }

    #[test]
    fn main_switch_off_stops_heating_above_base() {
        let mut engine = engine(false, false);
        assert!(!engine.evaluate(15.0, false));
    }

    #[test]
    fn leaving_scheduled_interval_turns_heating_off() {
        let mut engine = engine(true, true);
        assert!(engine.evaluate(19.0, true));
        assert!(!engine.evaluate(19.0, false));
    }

    #[test]
    fn sanitize_clamps_into_valid_ranges() {
        let mut settings = HeatingSettings {
            target_temp: 50.0,
            base_temp: f32::NAN,
            delta_temp: -1.0,
            main_switch: true,
            prog_switch: false,
        };
        settings.sanitize();

        assert_eq!(settings.target_temp, MAX_TARGET_TEMP);
        assert_eq!(settings.base_temp, 12.0);
        assert_eq!(settings.delta_temp, MIN_DELTA_TEMP);
        assert!(settings.main_switch);
    }

    #[test]
    fn setters_reject_out_of_range_values() {
        let mut engine = engine(true, false);

        assert!(!engine.set_target_temp(14.9));
        assert!(!engine.set_target_temp(30.1));
        assert!(engine.set_target_temp(22.0));
        assert_eq!(engine.settings().target_temp, 22.0);

        assert!(!engine.set_base_temp(4.0));
        assert!(engine.set_base_temp(10.0));

        assert!(!engine.set_delta_temp(1.5));
        assert!(!engine.set_delta_temp(f32::NAN));
        assert!(engine.set_delta_temp(0.5));
    }
}
