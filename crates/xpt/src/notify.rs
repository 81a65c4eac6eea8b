//! Discovery notifications
//!
//! The prober reports what happened as [`Notification`] values; the engine
//! hands them to a [`Notifier`]. [`ChannelNotifier`] forwards them as
//! [`XptEvent`]s to async consumers.

use crate::registry::DeviceRecord;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{DevicePath, TransportParams};
use serde::Serialize;
use tracing::error;

/// Receiver of discovery notifications; each event is delivered once
pub trait Notifier {
    fn device_found(&mut self, record: &DeviceRecord);
    fn device_lost(&mut self, path: DevicePath);
    fn device_identity_changed(&mut self, path: DevicePath);
    fn transfer_negotiation_changed(&mut self, path: DevicePath, params: &TransportParams);
}

/// Notification raised by a probe transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    DeviceFound,
    DeviceLost,
    IdentityChanged,
    NegotiationChanged(TransportParams),
}

/// Owned form of a notification
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum XptEvent {
    DeviceFound { record: Box<DeviceRecord> },
    DeviceLost { path: DevicePath },
    IdentityChanged { path: DevicePath },
    NegotiationChanged {
        path: DevicePath,
        params: TransportParams,
    },
}

impl XptEvent {
    pub fn path(&self) -> DevicePath {
        match self {
            Self::DeviceFound { record } => record.path,
            Self::DeviceLost { path }
            | Self::IdentityChanged { path }
            | Self::NegotiationChanged { path, .. } => *path,
        }
    }
}

/// Collects events in memory
impl Notifier for Vec<XptEvent> {
    fn device_found(&mut self, record: &DeviceRecord) {
        self.push(XptEvent::DeviceFound {
            record: Box::new(record.clone()),
        });
    }

    fn device_lost(&mut self, path: DevicePath) {
        self.push(XptEvent::DeviceLost { path });
    }

    fn device_identity_changed(&mut self, path: DevicePath) {
        self.push(XptEvent::IdentityChanged { path });
    }

    fn transfer_negotiation_changed(&mut self, path: DevicePath, params: &TransportParams) {
        self.push(XptEvent::NegotiationChanged {
            path,
            params: *params,
        });
    }
}

/// Publishes events on a bounded async channel
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: Sender<XptEvent>,
}

impl ChannelNotifier {
    /// Create the notifier and the receiving end
    pub fn channel(capacity: usize) -> (Self, Receiver<XptEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }

    fn publish(&self, event: XptEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                error!("Event channel full, dropping event for {}", event.path());
            }
            Err(TrySendError::Closed(_)) => {
                error!("Event channel closed");
            }
        }
    }
}

impl Notifier for ChannelNotifier {
    fn device_found(&mut self, record: &DeviceRecord) {
        self.publish(XptEvent::DeviceFound {
            record: Box::new(record.clone()),
        });
    }

    fn device_lost(&mut self, path: DevicePath) {
        self.publish(XptEvent::DeviceLost { path });
    }

    fn device_identity_changed(&mut self, path: DevicePath) {
        self.publish(XptEvent::IdentityChanged { path });
    }

    fn transfer_negotiation_changed(&mut self, path: DevicePath, params: &TransportParams) {
        self.publish(XptEvent::NegotiationChanged {
            path,
            params: *params,
        });
    }
}
