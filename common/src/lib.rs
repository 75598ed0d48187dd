pub mod command;
pub mod config;
pub mod frame;
pub mod interval;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use command::{parse_command, Command, SchedulePairing};
pub use config::{NetworkConfig, NodeConfig, RetryPolicy, SensorSettings};
pub use frame::{
    classify_pulse, FrameCapture, MeasureError, PulseClass, RawFrame, Reading, SensorConfigError,
    SensorVariant, SAMPLING_WINDOW_MS,
};
pub use interval::{DaySchedule, IntervalSlot, Weekday, WeekSchedule, SECONDS_PER_DAY};
pub use thermostat::{HeatingSettings, ThermostatEngine};
pub use topics::*;
pub use types::{NodeStatus, StateDelta};
