//! Serial transport opener and port enumeration.
//!
//! [`DeviceLink`](super::device_link::DeviceLink) never names a concrete port
//! type; it asks a [`TransportOpener`] for a byte stream.  Production uses
//! [`SerialPortOpener`]; tests hand in an in-memory duplex pipe.

use std::io;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Any bidirectional byte stream usable as the device transport.
pub trait SerialStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn SerialStream>;

#[async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(&self, path: &str, baud_rate: u32) -> io::Result<BoxedStream>;
}

/// Opens a real serial port (8N1, no flow control).
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

#[async_trait]
impl TransportOpener for SerialPortOpener {
    async fn open(&self, path: &str, baud_rate: u32) -> io::Result<BoxedStream> {
        use tokio_serial::SerialPortBuilderExt;

        debug!("opening serial port {path} at {baud_rate} baud");
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Box::new(port))
    }
}

/// One serial port present on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// USB vendor id as four lowercase hex digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

impl PortInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            manufacturer: None,
            serial_number: None,
            product: None,
            vendor_id: None,
            product_id: None,
        }
    }
}

impl From<tokio_serial::SerialPortInfo> for PortInfo {
    fn from(info: tokio_serial::SerialPortInfo) -> Self {
        let mut port = PortInfo::new(info.port_name);
        if let tokio_serial::SerialPortType::UsbPort(usb) = info.port_type {
            port.manufacturer = usb.manufacturer;
            port.serial_number = usb.serial_number;
            port.product = usb.product;
            port.vendor_id = Some(format!("{:04x}", usb.vid));
            port.product_id = Some(format!("{:04x}", usb.pid));
        }
        port
    }
}

/// Lists the serial ports an operator could point the bridge at.
///
/// Blocking; call it off the async workers.
pub trait PortLister: Send + Sync {
    fn list_ports(&self) -> io::Result<Vec<PortInfo>>;
}

impl PortLister for SerialPortOpener {
    fn list_ports(&self) -> io::Result<Vec<PortInfo>> {
        let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
        debug!("found {} serial ports", ports.len());
        Ok(ports.into_iter().map(PortInfo::from).collect())
    }
}
