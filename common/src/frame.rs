//! Sensor frame decoding for the single-wire timing-protocol sensor.
//!
//! The sensor answers a wake pulse with a 40-bit serial frame encoded in the
//! spacing of falling edges on the data line. The interrupt handler measures
//! the gap between consecutive falling edges and classifies each gap as a
//! zero bit, a one bit, or line noise. Bits land MSB-first in a 64-bit
//! buffer; after the sampling window closes the task side checks that
//! exactly 40 bits arrived, validates the checksum byte, and decodes the
//! payload per sensor variant.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gap bounds (µs between falling edges) for a transmitted zero bit.
const ZERO_BIT_MIN_US: u32 = 70;
const ZERO_BIT_MAX_US: u32 = 90;
/// Gap bounds (µs) for a transmitted one bit.
const ONE_BIT_MIN_US: u32 = 105;
const ONE_BIT_MAX_US: u32 = 125;

/// The serial stream starts at the top bit of the 64-bit buffer.
const INITIAL_BIT_INDEX: i32 = 63;
/// Index left after all 40 payload bits have been received (63 - 40).
const COMPLETE_BIT_INDEX: i32 = 23;

/// Number of frame bytes: four payload bytes plus the checksum.
pub const FRAME_BYTES: usize = 5;

/// The two supported sensor families. They share the wire protocol but
/// differ in wake timing and payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorVariant {
    /// Integer/fraction byte pairs, unsigned temperature.
    Standard,
    /// Big-endian 16-bit values in tenths, sign-magnitude temperature.
    Precision,
}

impl SensorVariant {
    /// How long the data line is held low to wake the sensor.
    pub fn wake_pulldown_ms(self) -> u64 {
        match self {
            Self::Standard => 20,
            Self::Precision => 10,
        }
    }

    /// Minimum delay between measurements, honored only in safe mode.
    pub fn safe_delay_ms(self) -> u64 {
        match self {
            Self::Standard => 1_500,
            Self::Precision => 2_500,
        }
    }
}

/// Upper bound on a full frame transmission; the sampling window sleeps
/// this long regardless of actual frame length.
pub const SAMPLING_WINDOW_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseClass {
    Zero,
    One,
    /// Outside both bands: dropped without advancing the bit counter.
    /// Noise during acquisition therefore desynchronizes the frame and is
    /// only caught afterwards by the bit count or checksum.
    Unclassified,
}

/// Maps the elapsed time between two falling edges to a decoded bit.
pub fn classify_pulse(elapsed_us: u32) -> PulseClass {
    if (ZERO_BIT_MIN_US..=ZERO_BIT_MAX_US).contains(&elapsed_us) {
        PulseClass::Zero
    } else if (ONE_BIT_MIN_US..=ONE_BIT_MAX_US).contains(&elapsed_us) {
        PulseClass::One
    } else {
        PulseClass::Unclassified
    }
}

#[derive(Debug, Error)]
pub enum SensorConfigError {
    #[error("gpio {0} cannot be used as a sensor data line")]
    InvalidLine(i32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeasureError {
    #[error("incomplete frame: received {bits_received} of 40 bits")]
    IncompleteFrame { bits_received: i32 },
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Receive state shared between the falling-edge interrupt handler and the
/// measuring task.
///
/// The protocol is single-writer/single-reader with no lock: while the
/// interrupt is armed, [`record_edge`](Self::record_edge) is the only
/// writer; the task calls [`finish`](Self::finish) only after disabling the
/// interrupt, which is the quiescence point that makes the read safe.
///
/// Storage is two 32-bit words holding a 64-bit buffer. A successful
/// reception fills the top 40 bits MSB-first and leaves the low 24 bits
/// zero. The buffer is cleared on every [`arm`](Self::arm), so zero bits
/// only need to decrement the index.
#[derive(Debug)]
pub struct FrameCapture {
    prev_edge_us: AtomicU32,
    bit_index: AtomicI32,
    words: [AtomicU32; 2],
}

impl FrameCapture {
    pub const fn new() -> Self {
        Self {
            prev_edge_us: AtomicU32::new(0),
            bit_index: AtomicI32::new(INITIAL_BIT_INDEX),
            words: [AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// Clears the buffer and seeds the edge-timing reference. Call
    /// immediately before enabling the falling-edge interrupt.
    pub fn arm(&self, now_us: u32) {
        self.words[0].store(0, Ordering::Relaxed);
        self.words[1].store(0, Ordering::Relaxed);
        self.bit_index.store(INITIAL_BIT_INDEX, Ordering::Relaxed);
        self.prev_edge_us.store(now_us, Ordering::Release);
    }

    /// Interrupt-context edge classifier. Must be the sole writer while the
    /// interrupt is armed; never reads the bit counter beyond indexing.
    pub fn record_edge(&self, now_us: u32) {
        let prev = self.prev_edge_us.swap(now_us, Ordering::Relaxed);
        let elapsed = now_us.wrapping_sub(prev);

        match classify_pulse(elapsed) {
            PulseClass::Zero => {
                // Buffer bit already zero from arm().
                self.bit_index.fetch_sub(1, Ordering::Relaxed);
            }
            PulseClass::One => {
                let index = self.bit_index.load(Ordering::Relaxed);
                if (0..=INITIAL_BIT_INDEX).contains(&index) {
                    self.words[(index >> 5) as usize]
                        .fetch_or(1 << (index & 31), Ordering::Relaxed);
                }
                self.bit_index.fetch_sub(1, Ordering::Relaxed);
            }
            PulseClass::Unclassified => {}
        }
    }

    /// Extracts the received frame. Valid only after the edge interrupt has
    /// been disabled; fails unless exactly 40 bits arrived and the checksum
    /// holds.
    pub fn finish(&self) -> Result<RawFrame, MeasureError> {
        let index = self.bit_index.load(Ordering::Acquire);
        if index != COMPLETE_BIT_INDEX {
            return Err(MeasureError::IncompleteFrame {
                bits_received: INITIAL_BIT_INDEX - index,
            });
        }

        let bits = (u64::from(self.words[1].load(Ordering::Acquire)) << 32)
            | u64::from(self.words[0].load(Ordering::Acquire));
        let bytes = bits.to_be_bytes();

        let mut frame = [0u8; FRAME_BYTES];
        frame.copy_from_slice(&bytes[..FRAME_BYTES]);
        let frame = RawFrame(frame);
        frame.verify_checksum()?;
        Ok(frame)
    }
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete frame in arrival order: humidity-integer, humidity-fraction,
/// temperature-integer, temperature-fraction, checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame(pub [u8; FRAME_BYTES]);

impl RawFrame {
    /// Builds a frame from the four payload bytes, appending the checksum.
    pub fn from_payload(payload: [u8; 4]) -> Self {
        let checksum = payload.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        Self([payload[0], payload[1], payload[2], payload[3], checksum])
    }

    fn verify_checksum(&self) -> Result<(), MeasureError> {
        let expected = self.0[..4]
            .iter()
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        if self.0[4] != expected {
            return Err(MeasureError::ChecksumMismatch {
                expected,
                actual: self.0[4],
            });
        }
        Ok(())
    }

    pub fn decode(&self, variant: SensorVariant) -> Reading {
        let [b0, b1, b2, b3, _] = self.0;
        match variant {
            SensorVariant::Standard => Reading {
                humidity_pct: f32::from(b0) + f32::from(b1) / 10.0,
                temperature_c: f32::from(b2) + f32::from(b3) / 10.0,
            },
            SensorVariant::Precision => {
                let humidity_raw = u16::from_be_bytes([b0, b1]);
                // Sign-magnitude, not two's complement: the top bit of the
                // temperature word is a sign flag over a 15-bit magnitude.
                let negative = b2 & 0x80 != 0;
                let magnitude = u16::from_be_bytes([b2 & 0x7F, b3]);
                let mut temperature_c = f32::from(magnitude) / 10.0;
                if negative {
                    temperature_c = -temperature_c;
                }
                Reading {
                    humidity_pct: f32::from(humidity_raw) / 10.0,
                    temperature_c,
                }
            }
        }
    }
}

/// A validated measurement. One decimal of precision in both channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Temperature in °C; negative values only from the Precision variant.
    pub temperature_c: f32,
    /// Relative humidity in %RH.
    pub humidity_pct: f32,
}
