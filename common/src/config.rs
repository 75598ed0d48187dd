use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::SensorVariant;
use crate::thermostat::HeatingSettings;

/// Static configuration for the one physical sensor. Exactly one sensor
/// is configured at a time; a second decoder instance must never alias
/// the same data line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorSettings {
    pub variant: SensorVariant,
    /// GPIO number of the single-wire data line.
    pub gpio: i32,
    /// When set, every measurement waits out the variant's minimum
    /// inter-measurement delay first, bounding the sampling rate.
    pub safe_mode: bool,
    pub retry: RetryPolicy,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            variant: SensorVariant::Standard,
            gpio: 5,
            safe_mode: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// What to do after a failed measurement. The default of zero reproduces
/// the historical behavior: retry immediately, with safe mode as the only
/// rate limit. A persistent hardware fault therefore re-spins without
/// backoff unless a delay is configured here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub failure_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { failure_delay_ms: 0 }
    }
}

impl RetryPolicy {
    /// How long the measurement loop sleeps before its next attempt.
    /// After a success it waits for the next minute boundary so published
    /// readings line up with the wall clock; after a failure it retries
    /// right away, delayed only by the configured backoff.
    pub fn next_attempt_delay(&self, success: bool, current_second: u32) -> Duration {
        if success {
            Duration::from_secs(u64::from(60 - current_second.min(59)))
        } else {
            Duration::from_millis(self.failure_delay_ms)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    /// Broker URI, e.g. `mqtt://192.168.1.100:1883`.
    pub mqtt_broker: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_broker: "mqtt://192.168.1.100:1883".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub sensor: SensorSettings,
    pub settings: HeatingSettings,
    pub network: NetworkConfig,
    /// POSIX TZ string applied before local-time schedule evaluation.
    pub timezone: String,
    /// GPIO driving the heating relay.
    pub relay_gpio: i32,
    /// GPIO of the status LED (active low), blinking while offline.
    pub led_gpio: i32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sensor: SensorSettings::default(),
            settings: HeatingSettings::default(),
            network: NetworkConfig::default(),
            timezone: "CET-1CEST,M3.5.0,M10.5.0/3".to_string(),
            relay_gpio: 4,
            led_gpio: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_matches_historical_immediate_retry() {
        assert_eq!(RetryPolicy::default().failure_delay_ms, 0);
    }

    #[test]
    fn failed_measurement_retries_without_minute_alignment() {
        let immediate = RetryPolicy { failure_delay_ms: 0 };
        assert_eq!(immediate.next_attempt_delay(false, 42), Duration::ZERO);

        let delayed = RetryPolicy {
            failure_delay_ms: 250,
        };
        assert_eq!(
            delayed.next_attempt_delay(false, 42),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn successful_measurement_waits_for_the_minute_boundary() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.next_attempt_delay(true, 0), Duration::from_secs(60));
        assert_eq!(retry.next_attempt_delay(true, 42), Duration::from_secs(18));
        assert_eq!(retry.next_attempt_delay(true, 59), Duration::from_secs(1));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = NodeConfig::default();
        let encoded = serde_json::to_string(&config).expect("serialize");
        let decoded: NodeConfig = serde_json::from_str(&encoded).expect("deserialize");

        assert_eq!(decoded.sensor.gpio, config.sensor.gpio);
        assert_eq!(decoded.timezone, config.timezone);
        assert!(decoded.sensor.safe_mode);
    }
}
