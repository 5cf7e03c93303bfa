mod bluetooth;
mod config;
mod error;
mod models;
mod orchestrator;
mod playback;
mod speed;
mod utils;

use log::{error, info, warn, LevelFilter};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use bluetooth::{monitor_sensor, resolve_characteristic, CscDecoder, NotificationMonitor};
use config::SyncConfig;
use error::Component;
use orchestrator::{spawn_signal_listener, Activity, Orchestrator};
use playback::{run_playback, PlaybackRateLogger};
use speed::SpeedController;
use utils::{duration_to_seconds, format_datetime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::new();

    // Initialize logging
    let level = config
        .as_ref()
        .map(|config| config.log_level)
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Starting BLE speed sync {}", env!("CARGO_PKG_VERSION"));
    let start_time = OffsetDateTime::now_utc();
    info!("Session started at: {}", format_datetime(&start_time));

    let cancel = CancellationToken::new();
    let signals = spawn_signal_listener(cancel.clone());
    let speed = Arc::new(SpeedController::new(config.speed.smoothing_window));
    info!(
        "Smoothing {} over the last {} samples",
        config.speed.units,
        speed.window_size()
    );

    let mut orchestrator = Orchestrator::new(cancel.clone());
    let result = orchestrator
        .run(resolve_characteristic(&config.ble, &cancel), |sensor, token| {
            let monitor =
                NotificationMonitor::new(CscDecoder::new(&config.speed), Arc::clone(&speed));
            let sink = PlaybackRateLogger::new(&config.playback, config.speed.units);
            vec![
                Activity::new(Component::Ble, monitor_sensor(sensor, monitor, token.clone())),
                Activity::new(
                    Component::Playback,
                    run_playback(sink, Arc::clone(&speed), config.playback.clone(), token),
                ),
            ]
        })
        .await;

    // Stop the signal listener
    cancel.cancel();
    if let Err(e) = signals.await {
        warn!("Signal listener ended abnormally: {}", e);
    }

    let end_time = OffsetDateTime::now_utc();
    info!(
        "Session ended at: {} after {} seconds",
        format_datetime(&end_time),
        duration_to_seconds(end_time - start_time)
    );

    match result {
        Ok(()) => info!("Shutdown complete... goodbye!"),
        Err(e) if e.is_cancellation() => info!("Cancelled before the sensor was ready"),
        Err(e) if e.is_startup_failure() => {
            error!("{} Fatal error: {}", e.component(), e);
            return Err(e.into());
        }
        Err(e) => error!("{} Shut down after failure: {}", e.component(), e),
    }

    Ok(())
}
