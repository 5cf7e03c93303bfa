use bluer::Address;
use log::LevelFilter;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SyncError;
use crate::models::SpeedUnits;

const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WHEEL_CIRCUMFERENCE_MM: f64 = 2105.0; // 700x25c road tire
const DEFAULT_SMOOTHING_WINDOW: usize = 5;
const DEFAULT_UPDATE_INTERVAL_MS: u64 = 1000;
const DEFAULT_SPEED_MULTIPLIER: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct BleConfig {
    pub sensor_address: Address,
    pub scan_timeout_secs: u64,
}

impl BleConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SpeedConfig {
    pub wheel_circumference_mm: f64,
    pub units: SpeedUnits,
    pub smoothing_window: usize,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Speeds below this pause playback
    pub speed_threshold: f64,
    pub update_interval: Duration,
    pub speed_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ble: BleConfig,
    pub speed: SpeedConfig,
    pub playback: PlaybackConfig,
    pub log_level: LevelFilter,
}

impl SyncConfig {
    /// Load configuration from the process environment and an optional `.env` file
    pub fn new() -> Result<Self, SyncError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, applying defaults and validation
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sensor_address = lookup("SENSOR_ADDRESS")
            .map(|value| value.trim().to_uppercase())
            .filter(|value| !value.is_empty())
            .ok_or(SyncError::Config {
                key: "SENSOR_ADDRESS",
                reason: "not set".into(),
            })?;
        let sensor_address = Address::from_str(&sensor_address).map_err(|e| SyncError::Config {
            key: "SENSOR_ADDRESS",
            reason: format!("'{}' is not a Bluetooth address: {}", sensor_address, e),
        })?;

        let scan_timeout_secs = parse_or(&lookup, "SCAN_TIMEOUT_SECS", DEFAULT_SCAN_TIMEOUT_SECS)?;
        if scan_timeout_secs == 0 {
            return Err(invalid("SCAN_TIMEOUT_SECS", "must be greater than zero"));
        }

        let wheel_circumference_mm = parse_or(
            &lookup,
            "WHEEL_CIRCUMFERENCE_MM",
            DEFAULT_WHEEL_CIRCUMFERENCE_MM,
        )?;
        if !(wheel_circumference_mm.is_finite() && wheel_circumference_mm > 0.0) {
            return Err(invalid("WHEEL_CIRCUMFERENCE_MM", "must be a positive number"));
        }

        let units = parse_or(&lookup, "SPEED_UNITS", SpeedUnits::KilometersPerHour)?;

        let smoothing_window = parse_or(&lookup, "SMOOTHING_WINDOW", DEFAULT_SMOOTHING_WINDOW)?;
        if smoothing_window == 0 {
            return Err(invalid("SMOOTHING_WINDOW", "must be at least 1"));
        }

        let speed_threshold = parse_or(&lookup, "SPEED_THRESHOLD", 0.0_f64)?;
        if !(speed_threshold.is_finite() && speed_threshold >= 0.0) {
            return Err(invalid("SPEED_THRESHOLD", "must not be negative"));
        }

        let update_interval_ms = parse_or(
            &lookup,
            "PLAYBACK_UPDATE_INTERVAL_MS",
            DEFAULT_UPDATE_INTERVAL_MS,
        )?;
        if update_interval_ms == 0 {
            return Err(invalid(
                "PLAYBACK_UPDATE_INTERVAL_MS",
                "must be greater than zero",
            ));
        }

        let speed_multiplier = parse_or(
            &lookup,
            "PLAYBACK_SPEED_MULTIPLIER",
            DEFAULT_SPEED_MULTIPLIER,
        )?;
        if !(speed_multiplier.is_finite() && speed_multiplier > 0.0) {
            return Err(invalid("PLAYBACK_SPEED_MULTIPLIER", "must be a positive number"));
        }

        let log_level = parse_or(&lookup, "LOG_LEVEL", LevelFilter::Info)?;

        Ok(SyncConfig {
            ble: BleConfig {
                sensor_address,
                scan_timeout_secs,
            },
            speed: SpeedConfig {
                wheel_circumference_mm,
                units,
                smoothing_window,
            },
            playback: PlaybackConfig {
                speed_threshold,
                update_interval: Duration::from_millis(update_interval_ms),
                speed_multiplier,
            },
            log_level,
        })
    }
}

fn invalid(key: &'static str, reason: &str) -> SyncError {
    SyncError::Config {
        key,
        reason: reason.to_string(),
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, SyncError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| SyncError::Config {
            key,
            reason: format!("'{}': {}", raw.trim(), e),
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<SyncConfig, SyncError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let config = load(&[("SENSOR_ADDRESS", "f1:42:d8:de:35:16")]).unwrap();

        assert_eq!(config.ble.sensor_address.to_string(), "F1:42:D8:DE:35:16");
        assert_eq!(config.ble.scan_timeout(), Duration::from_secs(30));
        assert_eq!(config.speed.wheel_circumference_mm, 2105.0);
        assert_eq!(config.speed.units, SpeedUnits::KilometersPerHour);
        assert_eq!(config.speed.smoothing_window, 5);
        assert_eq!(config.playback.update_interval, Duration::from_millis(1000));
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn reads_all_overrides() {
        let config = load(&[
            ("SENSOR_ADDRESS", "AA:BB:CC:DD:EE:FF"),
            ("SCAN_TIMEOUT_SECS", "10"),
            ("WHEEL_CIRCUMFERENCE_MM", "2096.5"),
            ("SPEED_UNITS", "mph"),
            ("SMOOTHING_WINDOW", "3"),
            ("SPEED_THRESHOLD", "1.5"),
            ("PLAYBACK_UPDATE_INTERVAL_MS", "250"),
            ("PLAYBACK_SPEED_MULTIPLIER", "0.05"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert_eq!(config.ble.scan_timeout_secs, 10);
        assert_eq!(config.speed.wheel_circumference_mm, 2096.5);
        assert_eq!(config.speed.units, SpeedUnits::MilesPerHour);
        assert_eq!(config.speed.smoothing_window, 3);
        assert_eq!(config.playback.speed_threshold, 1.5);
        assert_eq!(config.playback.update_interval, Duration::from_millis(250));
        assert_eq!(config.playback.speed_multiplier, 0.05);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn requires_sensor_address() {
        match load(&[]) {
            Err(SyncError::Config { key, .. }) => assert_eq!(key, "SENSOR_ADDRESS"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(load(&[("SENSOR_ADDRESS", "not-a-mac")]).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            ("SCAN_TIMEOUT_SECS", "0"),
            ("WHEEL_CIRCUMFERENCE_MM", "-1"),
            ("SPEED_UNITS", "knots"),
            ("SMOOTHING_WINDOW", "0"),
            ("SPEED_THRESHOLD", "-2"),
            ("PLAYBACK_UPDATE_INTERVAL_MS", "0"),
            ("PLAYBACK_SPEED_MULTIPLIER", "0"),
        ];

        for (key, value) in cases {
            match load(&[("SENSOR_ADDRESS", "AA:BB:CC:DD:EE:FF"), (key, value)]) {
                Err(SyncError::Config { key: bad_key, .. }) => assert_eq!(bad_key, key),
                other => panic!("{}={} should fail, got {:?}", key, value, other),
            }
        }
    }
}
