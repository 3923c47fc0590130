//! Serial channel and connection tuning.
//!
//! Both structs deserialize from JSON with every field optional, falling
//! back to the cabinet defaults (19200 baud, 8N1).
//!
//! ```
//! use medcab_hardware::{ConnectionConfig, SerialConfig};
//!
//! let serial = SerialConfig::new("/dev/ttyUSB1").with_baud_rate(9600);
//! assert!(serial.validate().is_ok());
//!
//! let connection: ConnectionConfig =
//!     serde_json::from_str(r#"{ "max_connect_attempts": 5 }"#).unwrap();
//! assert_eq!(connection.max_connect_attempts, 5);
//! assert_eq!(connection.response_timeout_ms, 1000);
//! ```

use medcab_core::Error;
use medcab_core::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BASE_DELAY_MS,
    DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_WRITE_ATTEMPTS, DEFAULT_WRITE_RETRY_DELAY_MS,
    FRAME_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_OPEN_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial port parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub open_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Check the parameters before a port is opened.
    ///
    /// # Errors
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> medcab_core::Result<()> {
        if self.port.trim().is_empty() {
            return Err(Error::MissingConfig("serial.port".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(Error::config("baud rate must be non-zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::config(format!(
                "data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(Error::config(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.open_timeout_ms == 0 {
            return Err(Error::config("open timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Retry, backoff and timeout settings of the connection manager and
/// command sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Attempts made by a protected connect.
    pub max_connect_attempts: u32,
    /// First protected-connect backoff, doubled per attempt.
    pub connect_base_delay_ms: u64,
    /// Attempts made to write one command.
    pub write_attempts: u32,
    /// Linear backoff step between write attempts.
    pub write_retry_delay_ms: u64,
    /// How long a written command may wait for its response.
    pub response_timeout_ms: u64,
    /// Incomplete-packet timeout of the framer.
    pub frame_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_base_delay_ms: DEFAULT_CONNECT_BASE_DELAY_MS,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            write_retry_delay_ms: DEFAULT_WRITE_RETRY_DELAY_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            frame_timeout_ms: FRAME_TIMEOUT_MS,
        }
    }
}

impl ConnectionConfig {
    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    pub fn with_connect_base_delay(mut self, delay: Duration) -> Self {
        self.connect_base_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts;
        self
    }

    pub fn with_write_retry_delay(mut self, delay: Duration) -> Self {
        self.write_retry_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn connect_base_delay(&self) -> Duration {
        Duration::from_millis(self.connect_base_delay_ms)
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// # Errors
    /// Returns a configuration error for zero attempts or zero timeouts.
    pub fn validate(&self) -> medcab_core::Result<()> {
        if self.max_connect_attempts == 0 {
            return Err(Error::config("max_connect_attempts must be at least 1"));
        }
        if self.write_attempts == 0 {
            return Err(Error::config("write_attempts must be at least 1"));
        }
        if self.response_timeout_ms == 0 {
            return Err(Error::config("response timeout must be non-zero"));
        }
        if self.frame_timeout_ms == 0 {
            return Err(Error::config("frame timeout must be non-zero"));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_serial_defaults_are_8n1() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 19_200);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, 1);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(SerialConfig::new(""))]
    #[case(SerialConfig::default().with_baud_rate(0))]
    #[case(SerialConfig { data_bits: 9, ..SerialConfig::default() })]
    #[case(SerialConfig { stop_bits: 3, ..SerialConfig::default() })]
    #[case(SerialConfig::default().with_open_timeout(Duration::ZERO))]
    fn test_serial_invalid(#[case] config: SerialConfig) {
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[rstest]
    #[case(ConnectionConfig::default().with_max_connect_attempts(0))]
    #[case(ConnectionConfig::default().with_write_attempts(0))]
    #[case(ConnectionConfig::default().with_response_timeout(Duration::ZERO))]
    #[case(ConnectionConfig { frame_timeout_ms: 0, ..ConnectionConfig::default() })]
    fn test_connection_invalid(#[case] config: ConnectionConfig) {
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_durations() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_base_delay(), Duration::from_millis(500));
        assert_eq!(config.write_retry_delay(), Duration::from_millis(100));
        assert_eq!(config.frame_timeout(), Duration::from_millis(500));
    }
}
