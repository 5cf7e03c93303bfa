use std::fmt;
use std::str::FromStr;

/// Unit the rider's speed is reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedUnits {
    KilometersPerHour,
    MilesPerHour,
}

impl SpeedUnits {
    /// Factor turning wheel millimeters per 1/1024 s tick into this unit
    pub fn conversion_factor(self) -> f64 {
        match self {
            SpeedUnits::KilometersPerHour => 3.6,
            SpeedUnits::MilesPerHour => 2.23694,
        }
    }
}

impl FromStr for SpeedUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "km/h" | "kmh" => Ok(SpeedUnits::KilometersPerHour),
            "mph" => Ok(SpeedUnits::MilesPerHour),
            other => Err(format!("expected km/h or mph, got '{}'", other)),
        }
    }
}

impl fmt::Display for SpeedUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedUnits::KilometersPerHour => write!(f, "km/h"),
            SpeedUnits::MilesPerHour => write!(f, "mph"),
        }
    }
}

/// Wheel revolution fields carried by one CSC Measurement notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CscMeasurement {
    pub flags: u8,
    pub cumulative_wheel_revolutions: u32,
    /// Units of 1/1024 second, wraps every 64 seconds
    pub last_wheel_event_time: u16,
}

/// Previous wheel sample of one monitoring session
///
/// `previous_wheel_event_time == 0` means no baseline has been taken yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderState {
    pub previous_wheel_revolutions: u32,
    pub previous_wheel_event_time: u16,
}

impl DecoderState {
    pub fn has_baseline(&self) -> bool {
        self.previous_wheel_event_time != 0
    }
}
