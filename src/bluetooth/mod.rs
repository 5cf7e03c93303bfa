pub mod csc;
pub mod monitor;
pub mod scanner;

pub use csc::CscDecoder;
pub use monitor::{monitor_sensor, NotificationMonitor};
pub use scanner::{resolve_characteristic, CscSensor};
