//! Device worker: one task that owns every call into the device controller.
//!
//! Requests are queued on an `mpsc` channel and executed strictly in arrival
//! order; each carries a `oneshot` for its result.  A caller that gives up
//! (connection closed, timeout) simply drops its receiver; the worker still
//! finishes the in-flight command so the wire never sees half a packet.

use std::sync::Arc;

use async_trait::async_trait;
use ipkvm_core::{
    AbsoluteMouseReport, DeviceController, DeviceError, InfoPacket, KeyboardReport,
    RelativeMouseReport,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Pending requests allowed before callers wait for queue space.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, DeviceError>>;

enum DeviceRequest {
    GetInfo(Reply<InfoPacket>),
    Keyboard(KeyboardReport, Reply<()>),
    MouseAbsolute(AbsoluteMouseReport, Reply<()>),
    MouseRelative(RelativeMouseReport, Reply<()>),
}

/// Cloneable front end of the worker; itself a [`DeviceController`].
#[derive(Clone)]
pub struct DeviceHandle {
    tx: mpsc::Sender<DeviceRequest>,
    inner: Arc<dyn DeviceController>,
}

pub struct DeviceWorker;

impl DeviceWorker {
    /// Starts the worker task.  It exits once every [`DeviceHandle`] is dropped.
    pub fn spawn(inner: Arc<dyn DeviceController>, queue_depth: usize) -> (DeviceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let task = tokio::spawn(run(Arc::clone(&inner), rx));
        (DeviceHandle { tx, inner }, task)
    }
}

async fn run(device: Arc<dyn DeviceController>, mut rx: mpsc::Receiver<DeviceRequest>) {
    debug!("device worker started");
    let mut handled: u64 = 0;
    while let Some(request) = rx.recv().await {
        handled += 1;
        // A failed send means the caller stopped waiting; nothing to do.
        match request {
            DeviceRequest::GetInfo(reply) => {
                let _ = reply.send(device.get_info().await);
            }
            DeviceRequest::Keyboard(report, reply) => {
                let _ = reply.send(device.send_keyboard(report).await);
            }
            DeviceRequest::MouseAbsolute(report, reply) => {
                let _ = reply.send(device.send_mouse_absolute(report).await);
            }
            DeviceRequest::MouseRelative(report, reply) => {
                let _ = reply.send(device.send_mouse_relative(report).await);
            }
        }
    }
    info!("device worker stopped after {handled} requests");
}

impl DeviceHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> DeviceRequest,
    ) -> Result<T, DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| DeviceError::Unavailable)?;
        reply_rx.await.map_err(|_| DeviceError::Unavailable)?
    }
}

#[async_trait]
impl DeviceController for DeviceHandle {
    async fn get_info(&self) -> Result<InfoPacket, DeviceError> {
        self.call(DeviceRequest::GetInfo).await
    }

    async fn send_keyboard(&self, report: KeyboardReport) -> Result<(), DeviceError> {
        self.call(|reply| DeviceRequest::Keyboard(report, reply)).await
    }

    async fn send_mouse_absolute(&self, report: AbsoluteMouseReport) -> Result<(), DeviceError> {
        self.call(|reply| DeviceRequest::MouseAbsolute(report, reply))
            .await
    }

    async fn send_mouse_relative(&self, report: RelativeMouseReport) -> Result<(), DeviceError> {
        self.call(|reply| DeviceRequest::MouseRelative(report, reply))
            .await
    }

    fn is_link_open(&self) -> bool {
        self.inner.is_link_open()
    }
}
