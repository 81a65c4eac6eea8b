//! Reset signature classification

use crate::types::{Protocol, TargetAddress};

/// Signature of a direct-access ATA device
pub const SIG_ATA: u16 = 0x0000;

/// Signature of a SATA port multiplier control port
pub const SIG_PORT_MULTIPLIER: u16 = 0x9669;

/// Signature of a packet (ATAPI) device
pub const SIG_ATAPI: u16 = 0xeb14;

/// What a reset signature says about the device at an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureClass {
    Ata,
    Atapi,
    PortMultiplier,
    /// The value is not valid at this address
    Unexpected(u16),
}

impl SignatureClass {
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            Self::Ata => Some(Protocol::Ata),
            Self::Atapi => Some(Protocol::Atapi),
            Self::PortMultiplier => Some(Protocol::PortMultiplier),
            Self::Unexpected(_) => None,
        }
    }
}

/// Classify a reset signature reported at `target`
///
/// Only the reserved port-multiplier slot may report [`SIG_PORT_MULTIPLIER`],
/// and it reports nothing else that identifies a device.
pub fn classify_signature(target: TargetAddress, signature: u16) -> SignatureClass {
    match (target, signature) {
        (TargetAddress::Ordinary(_), SIG_ATA) => SignatureClass::Ata,
        (TargetAddress::Ordinary(_), SIG_ATAPI) => SignatureClass::Atapi,
        (TargetAddress::PortMultiplierReserved, SIG_PORT_MULTIPLIER) => {
            SignatureClass::PortMultiplier
        }
        (_, other) => SignatureClass::Unexpected(other),
    }
}
