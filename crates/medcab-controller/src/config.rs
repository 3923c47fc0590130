//! Controller configuration.
//!
//! ```
//! use medcab_controller::ControllerConfig;
//! use medcab_protocol::LockPolarity;
//!
//! let config: ControllerConfig = serde_json::from_str(r#"{
//!     "device_kind": "DS12",
//!     "polarity": "clear-bit-means-locked",
//!     "serial": { "port": "/dev/ttyUSB1" }
//! }"#).unwrap();
//!
//! assert_eq!(config.polarity, LockPolarity::ClearBitMeansLocked);
//! assert_eq!(config.serial.baud_rate, 19200);
//! assert!(config.validate().is_ok());
//! ```

use medcab_core::constants::{DEFAULT_DEVICE_ADDRESS, DEFAULT_POLL_INTERVAL_MS};
use medcab_core::{DeviceAddress, Error};
use medcab_hardware::{ConnectionConfig, SerialConfig};
use medcab_protocol::{DeviceKind, LockPolarity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub device_kind: DeviceKind,
    pub device_address: u8,
    /// Meaning of a set status bit. Must match the board's documentation.
    pub polarity: LockPolarity,
    /// Status polling period while waiting for a lock-back.
    pub poll_interval_ms: u64,
    pub serial: SerialConfig,
    pub connection: ConnectionConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_kind: DeviceKind::default(),
            device_address: DEFAULT_DEVICE_ADDRESS,
            polarity: LockPolarity::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            serial: SerialConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.serial.port = port.into();
        self
    }

    pub fn with_polarity(mut self, polarity: LockPolarity) -> Self {
        self.polarity = polarity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(self.device_address)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// # Errors
    /// The first invalid parameter, as a configuration error.
    pub fn validate(&self) -> medcab_core::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll interval must be non-zero"));
        }
        self.serial.validate()?;
        self.connection.validate()
    }
}
