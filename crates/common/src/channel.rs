//! Async channel bridge between Tokio runtime and bus thread

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{BusId, Completion, DevicePath, PathCapability, Request, TransportParams};

/// Commands from Tokio runtime to bus thread
#[derive(Debug)]
pub enum BusCommand {
    /// Execute a probe command; answered later with [`BusEvent::Completed`]
    Execute(Request),

    /// Hold the queue of a device
    FreezeQueue { path: DevicePath, count: u32 },

    /// Drop `count` holds on the queue of a device
    ReleaseQueue {
        path: DevicePath,
        count: u32,
        /// Dispatch held requests immediately
        run_now: bool,
    },

    /// Apply transport settings to a device path
    SetTransportParams {
        path: DevicePath,
        params: TransportParams,
    },

    /// Query what a bus supports
    PathCapability {
        bus: BusId,
        /// Channel to send response back; `None` for an unknown bus
        response: tokio::sync::oneshot::Sender<Option<PathCapability>>,
    },

    /// Shutdown the bus thread gracefully
    Shutdown,
}

/// Events from the bus thread
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A request finished
    Completed(Completion),
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct BusBridge {
    cmd_tx: Sender<BusCommand>,
    event_rx: Receiver<BusEvent>,
}

impl BusBridge {
    /// Send a command to the bus thread
    pub async fn send_command(&self, cmd: BusCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Queue a command without waiting for channel capacity
    pub fn try_send_command(&self, cmd: BusCommand) -> crate::Result<()> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => crate::Error::Channel("bus command queue full".to_string()),
            TrySendError::Closed(_) => crate::Error::Channel("bus thread gone".to_string()),
        })
    }

    /// Receive an event from the bus thread
    pub async fn recv_event(&self) -> crate::Result<BusEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the bus thread for the capability of one bus
    pub async fn path_capability(&self, bus: BusId) -> crate::Result<Option<PathCapability>> {
        let (response, rx) = tokio::sync::oneshot::channel();
        self.send_command(BusCommand::PathCapability { bus, response })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for bus thread (blocking)
pub struct BusWorker {
    pub(crate) cmd_rx: Receiver<BusCommand>,
    /// Event sender (public for bus worker thread to access)
    pub event_tx: Sender<BusEvent>,
}

impl BusWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<BusCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<BusCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Send an event to Tokio runtime (blocking)
    pub fn send_event(&self, event: BusEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and bus thread
///
/// Returns (BusBridge for Tokio, BusWorker for bus thread)
pub fn create_bus_bridge() -> (BusBridge, BusWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        BusBridge { cmd_tx, event_rx },
        BusWorker { cmd_rx, event_tx },
    )
}
