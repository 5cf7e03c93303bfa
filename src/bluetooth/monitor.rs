/// CSC notification monitoring feeding the speed controller
use bluer::{DeviceEvent, DeviceProperty};
use futures_util::{future, Stream, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::bluetooth::csc::CscDecoder;
use crate::bluetooth::scanner::CscSensor;
use crate::error::SyncError;
use crate::speed::SpeedController;

/// One monitoring session: owns the decoder state for its lifetime
pub struct NotificationMonitor {
    decoder: CscDecoder,
    speed: Arc<SpeedController>,
}

impl NotificationMonitor {
    pub fn new(decoder: CscDecoder, speed: Arc<SpeedController>) -> Self {
        NotificationMonitor { decoder, speed }
    }

    /// Subscribe to the sensor's measurement characteristic and process notifications until cancelled
    pub async fn run(self, sensor: &CscSensor, cancel: CancellationToken) -> Result<(), SyncError> {
        // Watch the connection before subscribing so a drop in between is not missed
        let device_events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            events = sensor.device.events() => events.map_err(SyncError::SubscriptionFailed)?,
        };
        let connection = device_events.filter_map(|event| {
            future::ready(match event {
                DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) => Some(connected),
                _ => None,
            })
        });

        let notifications = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            subscribed = sensor.characteristic.notify() => subscribed.map_err(SyncError::SubscriptionFailed)?,
        };
        info!("Subscribed to CSC measurement notifications");

        if !matches!(sensor.device.is_connected().await, Ok(true)) {
            return Err(SyncError::ConnectionLost);
        }

        tokio::pin!(connection);
        tokio::pin!(notifications);
        self.consume(notifications, connection, cancel).await
    }

    /// Decode every payload of `notifications` into the speed controller
    ///
    /// `connection` carries the sensor's connected state; a `false` or the end
    /// of either stream before cancellation means the sensor went away.
    pub async fn consume<S, C>(
        mut self,
        mut notifications: S,
        mut connection: C,
        cancel: CancellationToken,
    ) -> Result<(), SyncError>
    where
        S: Stream<Item = Vec<u8>> + Unpin,
        C: Stream<Item = bool> + Unpin,
    {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stopping CSC notification monitoring");
                    return Ok(());
                }
                connected = connection.next() => match connected {
                    Some(true) => {}
                    Some(false) | None => {
                        warn!("Sensor disconnected");
                        return Err(SyncError::ConnectionLost);
                    }
                },
                payload = notifications.next() => match payload {
                    Some(payload) => {
                        let speed = self.decoder.process(&payload);
                        self.speed.update_speed(speed);
                    }
                    None => {
                        debug!("Notification stream ended");
                        return Err(SyncError::ConnectionLost);
                    }
                }
            }
        }
    }
}

/// Monitor `sensor` until cancelled, then drop the connection
pub async fn monitor_sensor(
    sensor: CscSensor,
    monitor: NotificationMonitor,
    cancel: CancellationToken,
) -> Result<(), SyncError> {
    info!("Starting real-time monitoring of {}", sensor.address());
    let result = monitor.run(&sensor, cancel).await;

    if let Err(e) = sensor.device.disconnect().await {
        warn!("Failed to disconnect from {}: {}", sensor.address(), e);
    } else {
        info!("Disconnected from {}", sensor.address());
    }
    result
}
