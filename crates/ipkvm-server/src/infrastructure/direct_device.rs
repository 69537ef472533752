//! `DeviceController` backed by a local [`DeviceLink`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipkvm_core::protocol::commands::{DEFAULT_ADDR, INFO_RESPONSE_SIZE};
use ipkvm_core::{
    decode, encode, AbsoluteMouseReport, CmdCode, DeviceController, DeviceError, InfoPacket,
    KeyboardReport, RelativeMouseReport,
};
use tracing::debug;

use crate::infrastructure::device_link::{DeviceLink, READ_TIMEOUT};

pub struct DirectController {
    link: Arc<DeviceLink>,
    addr: u8,
    read_timeout: Duration,
}

impl DirectController {
    pub fn new(link: Arc<DeviceLink>) -> Self {
        Self {
            link,
            addr: DEFAULT_ADDR,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    async fn send(&self, cmd: CmdCode, payload: &[u8]) -> Result<(), DeviceError> {
        let packet = encode(self.addr, cmd.into(), payload);
        self.link
            .write(&packet)
            .await
            .map_err(DeviceError::transport)
    }
}

#[async_trait]
impl DeviceController for DirectController {
    async fn get_info(&self) -> Result<InfoPacket, DeviceError> {
        let request = encode(self.addr, CmdCode::GetInfo.into(), &[]);
        let reply = self
            .link
            .request(&request, INFO_RESPONSE_SIZE, self.read_timeout)
            .await
            .map_err(DeviceError::transport)?;
        if reply.is_empty() {
            return Err(DeviceError::NoResponse);
        }

        let (packet, _) = decode(&reply)?;
        debug!(
            "info reply cmd=0x{:02X} len={}",
            packet.cmd,
            packet.data.len()
        );
        Ok(InfoPacket::from_payload(&packet.data)?)
    }

    async fn send_keyboard(&self, report: KeyboardReport) -> Result<(), DeviceError> {
        self.send(report.command(), &report.to_payload()).await
    }

    async fn send_mouse_absolute(&self, report: AbsoluteMouseReport) -> Result<(), DeviceError> {
        self.send(report.command(), &report.to_payload()).await
    }

    async fn send_mouse_relative(&self, report: RelativeMouseReport) -> Result<(), DeviceError> {
        self.send(report.command(), &report.to_payload()).await
    }

    fn is_link_open(&self) -> bool {
        self.link.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::{BoxedStream, TransportOpener};
    use std::io;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct PipeOpener(Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl TransportOpener for PipeOpener {
        async fn open(&self, _path: &str, _baud: u32) -> io::Result<BoxedStream> {
            let (near, far) = tokio::io::duplex(1024);
            *self.0.lock().unwrap() = Some(far);
            Ok(Box::new(near))
        }
    }

    async fn controller() -> (DirectController, DuplexStream) {
        let opener = Arc::new(PipeOpener(Mutex::new(None)));
        let link = Arc::new(DeviceLink::new(opener.clone(), "/dev/ttyTEST", 57600));
        link.open("/dev/ttyTEST", 57600).await.unwrap();
        let far = opener.0.lock().unwrap().take().unwrap();
        (DirectController::new(link), far)
    }

    #[tokio::test]
    async fn test_keyboard_report_is_framed_on_the_wire() {
        let (ctl, mut far) = controller().await;
        let report = KeyboardReport::new(0x02, &[0x04, 0, 0, 0, 0, 0]).unwrap();

        ctl.send_keyboard(report).await.unwrap();

        let mut buf = [0u8; 14];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf.to_vec(), encode(0x00, 0x02, &report.to_payload()));
    }

    #[tokio::test]
    async fn test_relative_report_is_framed_on_the_wire() {
        let (ctl, mut far) = controller().await;
        let report = RelativeMouseReport::new(0, 130.0, -200.0, 0);

        ctl.send_mouse_relative(report).await.unwrap();

        let mut buf = [0u8; 11];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[5..10], &[0x01, 0x00, 0x7F, 0x80, 0x00]);
    }

    #[tokio::test]
    async fn test_get_info_parses_device_reply() {
        // Arrange: emulate the chip answering GET_INFO
        let (ctl, mut far) = controller().await;
        let chip = tokio::spawn(async move {
            let mut request = [0u8; 6];
            far.read_exact(&mut request).await.unwrap();
            let reply = encode(0x00, 0x81, &[0x31, 0x01, 0x05, 0, 0, 0, 0, 0]);
            far.write_all(&reply).await.unwrap();
            (request, far)
        });

        // Act
        let info = ctl.get_info().await.unwrap();

        // Assert
        let (request, _far) = chip.await.unwrap();
        assert_eq!(request, [0x57, 0xAB, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(info.chip_version(), "V1.1");
        assert!(info.is_connected && info.num_lock && info.scroll_lock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_info_without_reply_is_no_response() {
        let (ctl, _far) = controller().await;
        assert!(matches!(ctl.get_info().await, Err(DeviceError::NoResponse)));
    }

    #[tokio::test]
    async fn test_get_info_with_corrupt_reply_is_protocol_error() {
        let (ctl, mut far) = controller().await;
        let chip = tokio::spawn(async move {
            let mut request = [0u8; 6];
            far.read_exact(&mut request).await.unwrap();
            let mut reply = encode(0x00, 0x81, &[0x31, 0x01, 0x05, 0, 0, 0, 0, 0]);
            reply[6] ^= 0xFF;
            far.write_all(&reply).await.unwrap();
            far
        });

        let result = ctl.get_info().await;

        let _far = chip.await.unwrap();
        assert!(matches!(result, Err(DeviceError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_is_link_open_follows_link() {
        let (ctl, _far) = controller().await;
        assert!(ctl.is_link_open());
        ctl.link().close().await.unwrap();
        assert!(!ctl.is_link_open());
    }
}
