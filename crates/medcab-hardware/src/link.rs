//! Byte channel to the cabinet board.
//!
//! [`SerialLink`] opens a duplex byte stream; everything above it (framing,
//! sequencing, retries) is link-agnostic. [`SerialPortLink`] drives a real
//! RS485 adapter through `tokio-serial`, and
//! [`MockLink`](crate::mock::MockLink) an in-memory simulated cabinet.
//!
//! # Object Safety
//!
//! `open` returns `impl Future`, so the trait is not object-safe. Use it as
//! a generic parameter (`ConnectionManager<L: SerialLink>`).

use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

use crate::config::{Parity, SerialConfig};
use crate::error::{Result, TransportError};

/// Opens byte streams to a cabinet.
pub trait SerialLink: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a fresh stream with the given parameters.
    fn open(&self, config: &SerialConfig) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Real serial port.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortLink;

impl SerialLink for SerialPortLink {
    type Stream = SerialStream;

    fn open(&self, config: &SerialConfig) -> impl Future<Output = Result<SerialStream>> + Send {
        let config = config.clone();
        async move {
            debug!(port = %config.port, baud = config.baud_rate, "Opening serial port");
            tokio_serial::new(&config.port, config.baud_rate)
                .data_bits(data_bits(config.data_bits))
                .parity(parity(config.parity))
                .stop_bits(stop_bits(config.stop_bits))
                .flow_control(FlowControl::None)
                .open_native_async()
                .map_err(|e| TransportError::open_failed(&config.port, e.to_string()))
        }
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

/// A serial port visible to the operating system.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
}

/// Enumerate the serial ports the OS reports.
///
/// # Errors
/// Returns [`TransportError::Io`] if enumeration itself fails.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;

    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            kind: port_kind(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn port_kind(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => match &usb.product {
            Some(product) => format!("usb ({product})"),
            None => format!("usb ({:04x}:{:04x})", usb.vid, usb.pid),
        },
        serialport::SerialPortType::PciPort => "pci".to_string(),
        serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
        serialport::SerialPortType::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_mapping() {
        assert_eq!(data_bits(8), DataBits::Eight);
        assert_eq!(data_bits(7), DataBits::Seven);
        assert_eq!(stop_bits(1), StopBits::One);
        assert_eq!(stop_bits(2), StopBits::Two);
        assert_eq!(parity(Parity::Even), tokio_serial::Parity::Even);
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/medcab-does-not-exist");
        let err = SerialPortLink.open(&config).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::OpenFailed { ref port, .. } if port == "/dev/medcab-does-not-exist"
        ));
    }
}
