/// Bluetooth Low Energy discovery of the configured CSC sensor
use bluer::gatt::remote::{Characteristic, Service};
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt::Display;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bluetooth::csc::{CSC_MEASUREMENT_UUID, CSC_SERVICE_UUID};
use crate::config::BleConfig;
use crate::error::SyncError;
use crate::utils::until_cancelled;

/// Connected sensor and its CSC Measurement characteristic
///
/// The characteristic is only valid while `device` stays connected.
pub struct CscSensor {
    pub device: Device,
    pub characteristic: Characteristic,
}

impl CscSensor {
    pub fn address(&self) -> Address {
        self.device.address()
    }
}

/// A device reported by discovery
///
/// BlueZ also reports cached devices that are not in range; `advertising`
/// is only set when the adapter has a current RSSI for the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting<A> {
    pub address: A,
    pub advertising: bool,
}

/// Wait for `target` to be seen advertising in a stream of discovery sightings
///
/// Gives up with `ScanTimeout` once `timeout` elapses and with
/// `ContextCancelled` as soon as `cancel` fires.
pub async fn wait_for_peripheral<S, A>(
    mut sightings: S,
    target: &A,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<A, SyncError>
where
    S: Stream<Item = Sighting<A>> + Unpin,
    A: PartialEq + Display,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::ContextCancelled),
            _ = &mut deadline => {
                return Err(SyncError::ScanTimeout {
                    address: target.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            event = sightings.next() => match event {
                Some(sighting) if sighting.address != *target => {
                    debug!("Ignoring peripheral {}", sighting.address)
                }
                Some(sighting) if sighting.advertising => return Ok(sighting.address),
                Some(sighting) => debug!("{} is known but not advertising", sighting.address),
                None => {
                    return Err(SyncError::ScanInterrupted {
                        address: target.to_string(),
                    });
                }
            }
        }
    }
}

async fn open_adapter() -> Result<Adapter, SyncError> {
    let session = bluer::Session::new().await.map_err(SyncError::Bluetooth)?;
    let adapter = session.default_adapter().await.map_err(SyncError::Bluetooth)?;
    adapter.set_powered(true).await.map_err(SyncError::Bluetooth)?;

    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: false,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    Ok(adapter)
}

async fn is_advertising(adapter: &Adapter, address: Address) -> bool {
    match adapter.device(address) {
        Ok(device) => matches!(device.rssi().await, Ok(Some(_))),
        Err(_) => false,
    }
}

async fn scan_for_sensor(
    adapter: &Adapter,
    config: &BleConfig,
    cancel: &CancellationToken,
) -> Result<Address, SyncError> {
    info!(
        "Scanning for BLE peripheral {} (timeout {}s)",
        config.sensor_address, config.scan_timeout_secs
    );

    // Property changes of known devices (RSSI updates) arrive as DeviceAdded too
    let events = adapter
        .discover_devices_with_changes()
        .await
        .map_err(SyncError::Bluetooth)?;
    let sightings = events.filter_map(move |event| async move {
        match event {
            AdapterEvent::DeviceAdded(address) => Some(Sighting {
                address,
                advertising: is_advertising(adapter, address).await,
            }),
            _ => None,
        }
    });
    tokio::pin!(sightings);

    let result = wait_for_peripheral(
        sightings,
        &config.sensor_address,
        config.scan_timeout(),
        cancel,
    )
    .await;

    // Discovery stops when the event stream is dropped
    debug!("Device discovery stopped");
    result
}

async fn find_service(device: &Device) -> Result<Service, SyncError> {
    let services = device
        .services()
        .await
        .map_err(|e| SyncError::ServiceNotFound(e.to_string()))?;

    for service in services {
        match service.uuid().await {
            Ok(uuid) if uuid == CSC_SERVICE_UUID => return Ok(service),
            Ok(_) => {}
            Err(e) => warn!("Failed to read service UUID: {}", e),
        }
    }

    Err(SyncError::ServiceNotFound(format!(
        "{} has no service {}",
        device.address(),
        CSC_SERVICE_UUID
    )))
}

async fn find_measurement_characteristic(service: &Service) -> Result<Characteristic, SyncError> {
    let characteristics = service
        .characteristics()
        .await
        .map_err(|e| SyncError::CharacteristicNotFound(e.to_string()))?;

    for characteristic in characteristics {
        match characteristic.uuid().await {
            Ok(uuid) if uuid == CSC_MEASUREMENT_UUID => return Ok(characteristic),
            Ok(_) => {}
            Err(e) => warn!("Failed to read characteristic UUID: {}", e),
        }
    }

    Err(SyncError::CharacteristicNotFound(format!(
        "CSC service has no characteristic {}",
        CSC_MEASUREMENT_UUID
    )))
}

/// Scan for, connect to and resolve the CSC Measurement characteristic of the configured sensor
pub async fn resolve_characteristic(
    config: &BleConfig,
    cancel: &CancellationToken,
) -> Result<CscSensor, SyncError> {
    let adapter = until_cancelled(cancel, open_adapter()).await??;
    info!("Using Bluetooth adapter {}", adapter.name());

    let address = scan_for_sensor(&adapter, config, cancel).await?;
    info!("Found BLE peripheral {}", address);

    let device = adapter.device(address).map_err(SyncError::Bluetooth)?;

    info!("Connecting to BLE peripheral {}", address);
    until_cancelled(cancel, device.connect())
        .await?
        .map_err(|source| SyncError::ConnectionFailed {
            address: address.to_string(),
            source,
        })?;
    info!("BLE peripheral connected");

    info!("Discovering CSC service {}", CSC_SERVICE_UUID);
    let service = until_cancelled(cancel, find_service(&device)).await??;
    info!("Found CSC service");

    info!("Discovering CSC measurement characteristic {}", CSC_MEASUREMENT_UUID);
    let characteristic =
        until_cancelled(cancel, find_measurement_characteristic(&service)).await??;
    info!("Found CSC measurement characteristic");

    Ok(CscSensor {
        device,
        characteristic,
    })
}
