use std::{
    ffi::CString,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Local, Timelike};
use embedded_svc::{
    mqtt::client::QoS,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, InputOutput, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EventPayload, LwtConfiguration, MqttClientConfiguration},
    nvs::EspDefaultNvsPartition,
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use thermo_common::{
    parse_command, Command, FrameCapture, NetworkConfig, NodeConfig, NodeStatus, Reading,
    SensorConfigError, SensorSettings, StateDelta, SAMPLING_WINDOW_MS, TOPIC_COMMANDS, TOPIC_DATA,
};

use crate::state::NodeState;

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const MAX_DATA_LINE_GPIO: i32 = 39;

enum Publication {
    Delta(StateDelta),
    Snapshot(NodeStatus),
}

/// The ISR argument is a leaked [`FrameCapture`], alive for the program
/// lifetime. Only edge timestamps cross this boundary.
unsafe extern "C" fn edge_isr(arg: *mut core::ffi::c_void) {
    let capture = &*(arg as *const FrameCapture);
    capture.record_edge(esp_idf_svc::sys::esp_timer_get_time() as u32);
}

/// Single-wire sensor driver. Owns the data line; the edge classifier runs
/// in the ISR and this driver only arms it, waits out the sampling window,
/// and collects the finished frame.
struct DhtDriver {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    capture: &'static FrameCapture,
    settings: SensorSettings,
    last_attempt: Option<Instant>,
}

impl DhtDriver {
    fn new(settings: SensorSettings) -> anyhow::Result<Self> {
        if !(0..=MAX_DATA_LINE_GPIO).contains(&settings.gpio) {
            return Err(SensorConfigError::InvalidLine(settings.gpio).into());
        }

        let mut pin = PinDriver::input_output_od(unsafe { AnyIOPin::new(settings.gpio) })?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        let capture: &'static FrameCapture = Box::leak(Box::new(FrameCapture::new()));

        let rc = unsafe { esp_idf_svc::sys::gpio_install_isr_service(0) };
        if rc != esp_idf_svc::sys::ESP_OK && rc != esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
            return Err(anyhow!("gpio_install_isr_service failed with code {rc}"));
        }

        unsafe {
            esp_idf_svc::sys::esp!(esp_idf_svc::sys::gpio_set_intr_type(
                settings.gpio,
                esp_idf_svc::sys::gpio_int_type_t_GPIO_INTR_NEGEDGE,
            ))?;
            esp_idf_svc::sys::esp!(esp_idf_svc::sys::gpio_isr_handler_add(
                settings.gpio,
                Some(edge_isr),
                capture as *const FrameCapture as *mut core::ffi::c_void,
            ))?;
            esp_idf_svc::sys::esp!(esp_idf_svc::sys::gpio_intr_disable(settings.gpio))?;
        }

        Ok(Self {
            pin,
            capture,
            settings,
            last_attempt: None,
        })
    }

    fn measure(&mut self) -> anyhow::Result<Reading> {
        if self.settings.safe_mode {
            let safe_delay = Duration::from_millis(self.settings.variant.safe_delay_ms());
            if let Some(last) = self.last_attempt {
                let since = last.elapsed();
                if since < safe_delay {
                    thread::sleep(safe_delay - since);
                }
            }
        }
        self.last_attempt = Some(Instant::now());

        // Wake pulse: hold the line low, then release it and listen.
        self.pin.set_low()?;
        thread::sleep(Duration::from_millis(
            self.settings.variant.wake_pulldown_ms(),
        ));

        self.capture
            .arm(unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u32);
        self.pin.set_high()?;
        unsafe {
            esp_idf_svc::sys::esp!(esp_idf_svc::sys::gpio_intr_enable(self.settings.gpio))?;
        }

        thread::sleep(Duration::from_millis(SAMPLING_WINDOW_MS));

        // Quiescence point: after this the ISR no longer touches the buffer.
        unsafe {
            esp_idf_svc::sys::esp!(esp_idf_svc::sys::gpio_intr_disable(self.settings.gpio))?;
        }

        let frame = self.capture.finish()?;
        Ok(frame.decode(self.settings.variant))
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = NodeConfig::default();
    config.settings.sanitize();
    if config.network.wifi_ssid.is_empty() {
        config.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
        config.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
    }

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let mut relay = PinDriver::output(unsafe { AnyOutputPin::new(config.relay_gpio) })?;
    relay.set_low()?;
    // Status LED is active low; on once the network is up.
    let mut led = PinDriver::output(unsafe { AnyOutputPin::new(config.led_gpio) })?;
    led.set_high()?;

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;
    led.set_low()?;

    // Local time drives the weekly program, so sync before measuring.
    set_timezone(&config.timezone)?;
    let sntp = EspSntp::new_default()?;
    info!("sntp started, sync status: {:?}", sntp.get_sync_status());

    let dht = DhtDriver::new(config.sensor).context("failed to configure sensor data line")?;

    let state = Arc::new(Mutex::new(NodeState::new(config.settings)));
    let (tx, rx) = mpsc::channel::<Publication>();

    let offline = StateDelta::NodeOnline(false).to_json().to_string();
    let mqtt_conf = MqttClientConfiguration {
        client_id: Some("thermo-node"),
        lwt: Some(LwtConfiguration {
            topic: TOPIC_DATA,
            payload: offline.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };
    let (mut mqtt, mut conn) = EspMqttClient::new(&config.network.mqtt_broker, &mqtt_conf)?;

    {
        let state = state.clone();
        let tx = tx.clone();
        thread::Builder::new()
            .name("mqtt-poll".to_string())
            .stack_size(8192)
            .spawn(move || loop {
                match conn.next() {
                    Ok(event) => {
                        if let EventPayload::Received { topic, data, .. } = event.payload() {
                            if topic == Some(TOPIC_COMMANDS) {
                                handle_command_payload(&state, &tx, data);
                            }
                        }
                    }
                    Err(err) => {
                        warn!("mqtt poll error: {err:?}");
                        thread::sleep(Duration::from_secs(2));
                    }
                }
            })
            .expect("failed to spawn mqtt thread");
    }

    {
        let state = state.clone();
        let tx = tx.clone();
        let mut dht = dht;
        let retry = config.sensor.retry;
        thread::Builder::new()
            .name("dht-measure".to_string())
            .stack_size(8192)
            .spawn(move || {
                // Start on a minute boundary so published readings line up
                // across nodes. A failed measurement retries right away
                // (subject only to the configured failure delay) instead of
                // waiting out the rest of the minute.
                let mut wait = retry.next_attempt_delay(true, Local::now().second());
                loop {
                    thread::sleep(wait);

                    // Measure outside the lock; safe mode can sleep for seconds.
                    let measurement = dht.measure();
                    wait = retry.next_attempt_delay(measurement.is_ok(), Local::now().second());

                    let deltas = {
                        let mut state = state.lock().unwrap();
                        let mut deltas = match &measurement {
                            Ok(reading) => {
                                info!(
                                    "measured {:.1}°C {:.1}%",
                                    reading.temperature_c, reading.humidity_pct
                                );
                                state.record_reading(reading.temperature_c, reading.humidity_pct)
                            }
                            Err(err) => {
                                warn!("measurement failed: {err:#}");
                                state.record_sensor_failure()
                            }
                        };
                        deltas.extend(state.evaluate(&Local::now()));
                        deltas
                    };

                    for delta in deltas {
                        let _ = tx.send(Publication::Delta(delta));
                    }
                }
            })
            .expect("failed to spawn measurement thread");
    }

    mqtt.subscribe(TOPIC_COMMANDS, QoS::AtLeastOnce)?;
    let _ = tx.send(Publication::Delta(StateDelta::NodeOnline(true)));

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _sntp = sntp;

    // The publisher owns the MQTT client and the relay, so every state
    // change goes out in the order it was produced.
    for publication in rx {
        if let Publication::Delta(StateDelta::HeatingOn(on)) = &publication {
            let result = if *on { relay.set_high() } else { relay.set_low() };
            if let Err(err) = result {
                warn!("failed to drive relay: {err:?}");
            }
        }

        let (payload, retain) = match &publication {
            Publication::Delta(delta) => (
                delta.to_json().to_string(),
                matches!(delta, StateDelta::NodeOnline(_)),
            ),
            Publication::Snapshot(status) => (serde_json::to_string(status)?, false),
        };

        if let Err(err) = mqtt.publish(TOPIC_DATA, QoS::AtLeastOnce, retain, payload.as_bytes()) {
            warn!("state publish failed: {err:?}");
        }
    }

    Ok(())
}

fn handle_command_payload(
    state: &Arc<Mutex<NodeState>>,
    tx: &mpsc::Sender<Publication>,
    data: &[u8],
) {
    let Ok(payload) = std::str::from_utf8(data) else {
        warn!("dropping non utf8 command payload");
        return;
    };
    let Some(command) = parse_command(payload) else {
        warn!("ignoring unrecognized command payload: {payload}");
        return;
    };

    if matches!(command, Command::UpdateRequest) {
        let snapshot = state.lock().unwrap().snapshot(true);
        let _ = tx.send(Publication::Snapshot(snapshot));
        return;
    }

    let deltas = {
        let mut state = state.lock().unwrap();
        let mut deltas = state.apply_command(command);
        deltas.extend(state.evaluate(&Local::now()));
        deltas
    };

    for delta in deltas {
        let _ = tx.send(Publication::Delta(delta));
    }
}

fn set_timezone(timezone: &str) -> anyhow::Result<()> {
    let name = CString::new("TZ")?;
    let value = CString::new(timezone)?;
    unsafe {
        esp_idf_svc::sys::setenv(name.as_ptr(), value.as_ptr(), 1);
        esp_idf_svc::sys::tzset();
    }
    Ok(())
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    last_err = None;
                    break;
                }
                Err(err) => {
                    warn!("wifi netif up failed on attempt {attempt}: {err:#}");
                    last_err = Some(err);
                }
            },
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => {
            Err(anyhow::Error::from(err)
                .context(format!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed")))
        }
    }
}
