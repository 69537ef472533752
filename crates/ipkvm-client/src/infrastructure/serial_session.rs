//! Drives the HID chip directly over a local serial port, without a bridge.

use std::sync::Arc;

use ipkvm_core::DeviceController;
use ipkvm_server::infrastructure::{DeviceLink, DirectController, LinkError, TransportOpener};
use tracing::{info, warn};

pub struct SerialSession {
    link: Arc<DeviceLink>,
    controller: Arc<DirectController>,
}

impl SerialSession {
    /// Opens `device` through `opener`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Open`] when the port cannot be opened.
    pub async fn open(
        opener: Arc<dyn TransportOpener>,
        device: &str,
        baud_rate: u32,
    ) -> Result<Self, LinkError> {
        let link = Arc::new(DeviceLink::new(opener, device, baud_rate));
        link.open(device, baud_rate).await?;
        info!("driving {device} directly");
        Ok(Self {
            controller: Arc::new(DirectController::new(Arc::clone(&link))),
            link,
        })
    }

    pub fn controller(&self) -> &dyn DeviceController {
        self.controller.as_ref()
    }

    pub async fn close(self) {
        if let Err(e) = self.link.close().await {
            warn!("closing serial link: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ipkvm_core::{encode, KeyboardReport};
    use ipkvm_server::infrastructure::serial::BoxedStream;
    use std::io;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct PipeOpener(Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl TransportOpener for PipeOpener {
        async fn open(&self, _path: &str, _baud: u32) -> io::Result<BoxedStream> {
            let (near, far) = tokio::io::duplex(256);
            *self.0.lock().unwrap() = Some(far);
            Ok(Box::new(near))
        }
    }

    struct RefusingOpener;

    #[async_trait]
    impl TransportOpener for RefusingOpener {
        async fn open(&self, _path: &str, _baud: u32) -> io::Result<BoxedStream> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such port"))
        }
    }

    #[tokio::test]
    async fn test_reports_reach_the_port() {
        // Arrange
        let opener = Arc::new(PipeOpener(Mutex::new(None)));
        let session = SerialSession::open(opener.clone(), "/dev/ttyTEST", 57600)
            .await
            .unwrap();
        let mut far = opener.0.lock().unwrap().take().unwrap();

        // Act
        session
            .controller()
            .send_keyboard(KeyboardReport::released())
            .await
            .unwrap();

        // Assert
        let mut buf = [0u8; 14];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf.to_vec(), encode(0x00, 0x02, &[0; 8]));
        session.close().await;
    }

    #[tokio::test]
    async fn test_open_failure_names_the_port() {
        let result = SerialSession::open(Arc::new(RefusingOpener), "/dev/ttyNONE", 9600).await;

        match result {
            Err(LinkError::Open { path, .. }) => assert_eq!(path, "/dev/ttyNONE"),
            _ => panic!("expected open failure"),
        }
    }
}
