//! Host build: runs the full node logic against a real MQTT broker, with a
//! simulated sensor that pushes synthetic edge streams through the same
//! frame decoder the ESP build uses.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{Local, Timelike};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{info, warn};

use thermo_common::{
    parse_command, Command, FrameCapture, MeasureError, NodeConfig, RawFrame, Reading,
    SensorVariant, StateDelta, TOPIC_COMMANDS, TOPIC_DATA,
};

use crate::state::NodeState;

// A classified edge is the 50us low preamble plus the data high time, so
// these land mid-window for each bit class. The sensor response pulses are
// wider than a one bit and fall through as unclassified.
const RESPONSE_GAP_US: u32 = 160;
const ZERO_PULSE_US: u32 = 78;
const ONE_PULSE_US: u32 = 120;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = NodeConfig::default();
    config.settings.sanitize();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("thermo-node-host", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    // Offline last will so dashboards notice a dead node.
    let offline = StateDelta::NodeOnline(false).to_json().to_string();
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_DATA,
        offline,
        QoS::AtLeastOnce,
        true,
    ));

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    let state = Arc::new(Mutex::new(NodeState::new(config.settings)));

    mqtt.subscribe(TOPIC_COMMANDS, QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to command topic")?;
    publish_delta(&mqtt, &StateDelta::NodeOnline(true)).await?;

    {
        let state = state.clone();
        let mqtt = mqtt.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        let payload = String::from_utf8_lossy(&message.payload).to_string();
                        if let Err(err) = handle_command_payload(&state, &mqtt, &payload).await {
                            warn!("command handling error: {err:#}");
                        }
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    info!(
        "node started (simulated {:?} sensor on host)",
        config.sensor.variant
    );

    let mut sensor = SimulatedSensor::new(config.sensor.variant);
    let retry = config.sensor.retry;

    // Start on a minute boundary so published readings line up across
    // nodes. A failed measurement retries right away (subject only to the
    // configured failure delay) instead of waiting out the rest of the
    // minute.
    let mut wait = retry.next_attempt_delay(true, Local::now().second());
    loop {
        tokio::time::sleep(wait).await;

        let measurement = sensor.measure();
        wait = retry.next_attempt_delay(measurement.is_ok(), Local::now().second());

        let deltas = {
            let mut state = state.lock().await;
            let mut deltas = match measurement {
                Ok(reading) => {
                    info!(
                        "measured {:.1}°C {:.1}%",
                        reading.temperature_c, reading.humidity_pct
                    );
                    state.record_reading(reading.temperature_c, reading.humidity_pct)
                }
                Err(err) => {
                    warn!("measurement failed: {err}");
                    state.record_sensor_failure()
                }
            };
            deltas.extend(state.evaluate(&Local::now()));
            deltas
        };

        for delta in &deltas {
            if let Err(err) = publish_delta(&mqtt, delta).await {
                warn!("state publish failed: {err:#}");
            }
        }
    }
}

async fn handle_command_payload(
    state: &Arc<Mutex<NodeState>>,
    mqtt: &AsyncClient,
    payload: &str,
) -> anyhow::Result<()> {
    let Some(command) = parse_command(payload) else {
        warn!("ignoring unrecognized command payload: {payload}");
        return Ok(());
    };

    if matches!(command, Command::UpdateRequest) {
        let snapshot = { state.lock().await.snapshot(true) };
        let body = serde_json::to_string(&snapshot)?;
        mqtt.publish(TOPIC_DATA, QoS::AtLeastOnce, false, body)
            .await
            .context("snapshot publish failed")?;
        return Ok(());
    }

    let deltas = {
        let mut state = state.lock().await;
        let mut deltas = state.apply_command(command);
        deltas.extend(state.evaluate(&Local::now()));
        deltas
    };

    for delta in &deltas {
        publish_delta(mqtt, delta).await?;
    }
    Ok(())
}

async fn publish_delta(mqtt: &AsyncClient, delta: &StateDelta) -> anyhow::Result<()> {
    let retain = matches!(delta, StateDelta::NodeOnline(_));
    mqtt.publish(
        TOPIC_DATA,
        QoS::AtLeastOnce,
        retain,
        delta.to_json().to_string(),
    )
    .await
    .context("state publish failed")
}

/// Stands in for the hardware: encodes a drifting reading as a 40-bit frame
/// and replays it as falling-edge timestamps through a [`FrameCapture`].
struct SimulatedSensor {
    variant: SensorVariant,
    capture: FrameCapture,
    clock_us: u32,
    tick: u64,
}

impl SimulatedSensor {
    fn new(variant: SensorVariant) -> Self {
        Self {
            variant,
            capture: FrameCapture::new(),
            clock_us: 0,
            tick: 0,
        }
    }

    fn measure(&mut self) -> Result<Reading, MeasureError> {
        self.tick = self.tick.wrapping_add(1);
        let temperature = 19.0 + (self.tick % 8) as f32 * 0.5;
        let humidity = 42.0 + (self.tick % 6) as f32;
        let frame = encode_reading(self.variant, temperature, humidity);

        self.capture.arm(self.clock_us);
        self.clock_us = self.clock_us.wrapping_add(RESPONSE_GAP_US);
        self.capture.record_edge(self.clock_us);

        for byte in frame.0 {
            for bit in (0..8).rev() {
                let pulse = if byte >> bit & 1 == 1 {
                    ONE_PULSE_US
                } else {
                    ZERO_PULSE_US
                };
                self.clock_us = self.clock_us.wrapping_add(pulse);
                self.capture.record_edge(self.clock_us);
            }
        }

        self.capture.finish().map(|frame| frame.decode(self.variant))
    }
}

fn encode_reading(variant: SensorVariant, temperature: f32, humidity: f32) -> RawFrame {
    let payload = match variant {
        SensorVariant::Standard => [
            humidity as u8,
            ((humidity * 10.0).round() as u32 % 10) as u8,
            temperature as u8,
            ((temperature * 10.0).round() as u32 % 10) as u8,
        ],
        SensorVariant::Precision => {
            let humi_raw = (humidity * 10.0).round() as u16;
            let temp_raw = (temperature.abs() * 10.0).round() as u16;
            let sign = if temperature < 0.0 { 0x80 } else { 0x00 };
            [
                (humi_raw >> 8) as u8,
                humi_raw as u8,
                (temp_raw >> 8) as u8 | sign,
                temp_raw as u8,
            ]
        }
    };
    RawFrame::from_payload(payload)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn simulated_sensor_frames_survive_the_decoder() {
        let mut sensor = SimulatedSensor::new(SensorVariant::Standard);

        for _ in 0..10 {
            let reading = sensor.measure().expect("decode");
            assert!((19.0..=23.0).contains(&reading.temperature_c));
            assert!((42.0..=48.0).contains(&reading.humidity_pct));
        }
    }

    #[test]
    fn precision_encoding_round_trips_negative_temperatures() {
        let frame = encode_reading(SensorVariant::Precision, -5.6, 33.3);
        let reading = frame.decode(SensorVariant::Precision);

        assert_eq!(reading.temperature_c, -5.6);
        assert_eq!(reading.humidity_pct, 33.3);
    }
}
