/// Playback loop pushing the rider's smoothed speed to a playback backend
use log::{debug, info};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PlaybackConfig;
use crate::error::SyncError;
use crate::models::SpeedUnits;
use crate::speed::SpeedController;
use crate::utils::round_to;

/// Backend that adjusts playback to the rider's current speed
pub trait PlaybackSink: Send {
    fn set_speed(&mut self, speed: f64) -> Result<(), SyncError>;
}

/// Sink that turns speed into a playback rate and logs rate changes
///
/// Speeds below the threshold pause playback (rate 0).
#[derive(Debug)]
pub struct PlaybackRateLogger {
    speed_threshold: f64,
    speed_multiplier: f64,
    units: SpeedUnits,
    current_rate: Option<f64>,
}

impl PlaybackRateLogger {
    pub fn new(config: &PlaybackConfig, units: SpeedUnits) -> Self {
        PlaybackRateLogger {
            speed_threshold: config.speed_threshold,
            speed_multiplier: config.speed_multiplier,
            units,
            current_rate: None,
        }
    }

    pub fn playback_rate(&self, speed: f64) -> f64 {
        if speed <= 0.0 || speed < self.speed_threshold {
            0.0
        } else {
            round_to(speed * self.speed_multiplier, 2)
        }
    }

    pub fn current_rate(&self) -> Option<f64> {
        self.current_rate
    }
}

impl PlaybackSink for PlaybackRateLogger {
    fn set_speed(&mut self, speed: f64) -> Result<(), SyncError> {
        if !speed.is_finite() {
            return Err(SyncError::Playback(format!("unusable speed value {}", speed)));
        }

        let rate = self.playback_rate(speed);
        if self.current_rate != Some(rate) {
            if rate == 0.0 {
                info!("Playback paused at {:.2} {}", round_to(speed, 2), self.units);
            } else {
                info!(
                    "Playback rate {:.2}x at {:.2} {}",
                    rate,
                    round_to(speed, 2),
                    self.units
                );
            }
            self.current_rate = Some(rate);
        }
        Ok(())
    }
}

/// Feed the smoothed speed to `sink` every update interval until cancelled
pub async fn run_playback<P>(
    mut sink: P,
    speed: Arc<SpeedController>,
    config: PlaybackConfig,
    cancel: CancellationToken,
) -> Result<(), SyncError>
where
    P: PlaybackSink,
{
    info!(
        "Starting playback updates every {} ms",
        config.update_interval.as_millis()
    );

    let mut ticker = interval(config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Playback loop cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {
                sink.set_speed(speed.current_smoothed_speed())?;
            }
        }
    }
}
