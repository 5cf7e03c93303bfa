/// Cycling Speed and Cadence (CSC) measurement decoding
use bluer::Uuid;
use log::debug;

use crate::config::SpeedConfig;
use crate::models::{CscMeasurement, DecoderState, SpeedUnits};
use crate::utils::round_to;

// CSC GATT identifiers (16-bit UUIDs on the Bluetooth base UUID)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

const WHEEL_REVOLUTION_DATA_PRESENT: u8 = 0x01;
const WHEEL_DATA_LEN: usize = 7;

/// Extract the wheel revolution fields of a CSC Measurement payload
///
/// Layout:
/// - Byte 0: Flags (bit 0 = wheel revolution data present)
/// - Bytes 1-4: Cumulative wheel revolutions (unsigned 32-bit, little-endian)
/// - Bytes 5-6: Last wheel event time (unsigned 16-bit, little-endian, 1/1024 s)
///
/// Returns None when the payload carries no usable wheel data.
pub fn parse_measurement(payload: &[u8]) -> Option<CscMeasurement> {
    let flags = *payload.first()?;
    if flags & WHEEL_REVOLUTION_DATA_PRESENT == 0 || payload.len() < WHEEL_DATA_LEN {
        return None;
    }

    Some(CscMeasurement {
        flags,
        cumulative_wheel_revolutions: u32::from_le_bytes([
            payload[1], payload[2], payload[3], payload[4],
        ]),
        last_wheel_event_time: u16::from_le_bytes([payload[5], payload[6]]),
    })
}

/// Decode one notification into an instantaneous speed and the next decoder state
///
/// Pure in its inputs: the first valid sample of a session only establishes
/// the baseline, and a zero time delta keeps the previous baseline so that
/// revolutions reported under a repeated timestamp are counted later.
pub fn decode(
    payload: &[u8],
    state: DecoderState,
    wheel_circumference_mm: f64,
    units: SpeedUnits,
) -> (f64, DecoderState) {
    let Some(measurement) = parse_measurement(payload) else {
        return (0.0, state);
    };

    let current = DecoderState {
        previous_wheel_revolutions: measurement.cumulative_wheel_revolutions,
        previous_wheel_event_time: measurement.last_wheel_event_time,
    };

    if !state.has_baseline() {
        return (0.0, current);
    }

    let time_diff = measurement
        .last_wheel_event_time
        .wrapping_sub(state.previous_wheel_event_time);
    if time_diff == 0 {
        return (0.0, state);
    }

    // Signed so reordered samples produce a negative value instead of a huge one
    let rev_diff = measurement
        .cumulative_wheel_revolutions
        .wrapping_sub(state.previous_wheel_revolutions) as i32;

    let speed = f64::from(rev_diff) * wheel_circumference_mm * units.conversion_factor()
        / f64::from(time_diff);

    (speed, current)
}

/// Decoder bound to one monitoring session
#[derive(Debug)]
pub struct CscDecoder {
    state: DecoderState,
    wheel_circumference_mm: f64,
    units: SpeedUnits,
}

impl CscDecoder {
    pub fn new(config: &SpeedConfig) -> Self {
        CscDecoder {
            state: DecoderState::default(),
            wheel_circumference_mm: config.wheel_circumference_mm,
            units: config.units,
        }
    }

    pub fn process(&mut self, payload: &[u8]) -> f64 {
        let (speed, state) = decode(payload, self.state, self.wheel_circumference_mm, self.units);
        self.state = state;
        debug!("Sensor speed: {:.2} {}", round_to(speed, 2), self.units);
        speed
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }
}
