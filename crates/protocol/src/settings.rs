//! Path capability and transport settings exchanged with the transport

use crate::types::{Protocol, TransferMode, TransportKind};
use serde::{Deserialize, Serialize};

/// What the transport reports about one bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCapability {
    /// Number of ordinary target ids (targets `0..max_target`)
    pub max_target: u8,
    /// The controller can talk to a port multiplier at the reserved target
    pub port_multiplier: bool,
    pub transport: TransportKind,
    /// The controller can act as initiator; a target-mode-only bus is never scanned
    pub initiator: bool,
}

impl PathCapability {
    /// A SATA port with one device slot
    pub fn sata_port(port_multiplier: bool) -> Self {
        Self {
            max_target: 1,
            port_multiplier,
            transport: TransportKind::Sata,
            initiator: true,
        }
    }
}

/// Transport settings; only fields that are `Some` are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParams {
    pub protocol: Option<Protocol>,
    pub protocol_version: Option<u8>,
    pub transport: Option<TransportKind>,
    pub transport_version: Option<u8>,
    pub mode: Option<TransferMode>,
    pub pm_present: Option<bool>,
}

impl TransportParams {
    pub fn pm_present(present: bool) -> Self {
        Self {
            pm_present: Some(present),
            ..Self::default()
        }
    }

    pub fn mode(mode: TransferMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay the fields set in `other`
    pub fn merge(&mut self, other: &TransportParams) {
        if other.protocol.is_some() {
            self.protocol = other.protocol;
        }
        if other.protocol_version.is_some() {
            self.protocol_version = other.protocol_version;
        }
        if other.transport.is_some() {
            self.transport = other.transport;
        }
        if other.transport_version.is_some() {
            self.transport_version = other.transport_version;
        }
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.pm_present.is_some() {
            self.pm_present = other.pm_present;
        }
    }
}
