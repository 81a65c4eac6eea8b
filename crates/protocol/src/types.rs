//! Bus addressing and device classification types
//!
//! A bus exposes up to fifteen ordinary target ids plus one reserved id
//! (15) where a SATA port multiplier answers. Code that branches on the
//! address uses [`TargetAddress`] so the reserved slot is matched
//! exhaustively instead of compared numerically.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw target id of the port-multiplier control port
pub const PORT_MULTIPLIER_TARGET: u8 = 15;

/// Number of ordinary (non-reserved) target ids on a bus
pub const MAX_ORDINARY_TARGETS: u8 = PORT_MULTIPLIER_TARGET;

/// Bus (path) identifier assigned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusId(pub u32);

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}", self.0)
    }
}

/// Target address on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TargetAddress {
    /// Directly attached device slot (0-14)
    Ordinary(u8),
    /// Reserved slot where a port multiplier reports itself
    PortMultiplierReserved,
}

impl TargetAddress {
    /// Decode a raw target id
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            PORT_MULTIPLIER_TARGET => Ok(Self::PortMultiplierReserved),
            n if n < MAX_ORDINARY_TARGETS => Ok(Self::Ordinary(n)),
            n => Err(ProtocolError::InvalidTarget(n)),
        }
    }

    /// Raw target id as used on the wire
    pub fn raw(self) -> u8 {
        match self {
            Self::Ordinary(n) => n,
            Self::PortMultiplierReserved => PORT_MULTIPLIER_TARGET,
        }
    }

    pub fn is_port_multiplier(self) -> bool {
        matches!(self, Self::PortMultiplierReserved)
    }
}

impl TryFrom<u8> for TargetAddress {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<TargetAddress> for u8 {
    fn from(target: TargetAddress) -> u8 {
        target.raw()
    }
}

impl PartialOrd for TargetAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw().cmp(&other.raw())
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinary(n) => write!(f, "{}", n),
            Self::PortMultiplierReserved => write!(f, "{}(pm)", PORT_MULTIPLIER_TARGET),
        }
    }
}

/// Fully qualified probe address: (bus, target, lun)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DevicePath {
    pub bus: BusId,
    pub target: TargetAddress,
    pub lun: u32,
}

impl DevicePath {
    /// Path to lun 0 of a target, the only lun ATA devices expose
    pub fn new(bus: BusId, target: TargetAddress) -> Self {
        Self {
            bus,
            target,
            lun: 0,
        }
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bus, self.target, self.lun)
    }
}

/// Command protocol spoken by the device at an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Not yet classified
    #[default]
    Unknown,
    /// Direct-access ATA command set
    Ata,
    /// Packet (ATAPI) devices carrying SCSI commands
    Atapi,
    /// SATA port multiplier control port
    PortMultiplier,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Ata => "ATA",
            Self::Atapi => "ATAPI",
            Self::PortMultiplier => "SATA PM",
        };
        f.write_str(name)
    }
}

/// Physical transport underneath the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Parallel ATA
    Ata,
    /// Serial ATA
    Sata,
}

/// Transfer mode code as carried in SET FEATURES / SET TRANSFER MODE
///
/// The numeric codes order the modes by speed: every UDMA mode is above
/// every multiword DMA mode, which is above every PIO mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransferMode(pub u8);

impl TransferMode {
    pub const PIO0: Self = Self(0x08);
    pub const PIO1: Self = Self(0x09);
    pub const PIO2: Self = Self(0x0a);
    pub const PIO3: Self = Self(0x0b);
    pub const PIO4: Self = Self(0x0c);
    pub const WDMA0: Self = Self(0x20);
    pub const WDMA1: Self = Self(0x21);
    pub const WDMA2: Self = Self(0x22);
    pub const UDMA0: Self = Self(0x40);
    pub const UDMA1: Self = Self(0x41);
    pub const UDMA2: Self = Self(0x42);
    pub const UDMA3: Self = Self(0x43);
    pub const UDMA4: Self = Self(0x44);
    pub const UDMA5: Self = Self(0x45);
    pub const UDMA6: Self = Self(0x46);

    /// Build a mode from its raw code, rejecting codes outside the defined families
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x08..=0x0c | 0x20..=0x22 | 0x40..=0x46 => Ok(Self(code)),
            _ => Err(ProtocolError::InvalidTransferMode(format!("{:#04x}", code))),
        }
    }

    pub fn udma(n: u8) -> Self {
        Self(Self::UDMA0.0 + n.min(6))
    }

    pub fn wdma(n: u8) -> Self {
        Self(Self::WDMA0.0 + n.min(2))
    }

    pub fn pio(n: u8) -> Self {
        Self(Self::PIO0.0 + n.min(4))
    }

    pub fn is_pio(self) -> bool {
        self < Self::WDMA0
    }

    pub fn is_dma(self) -> bool {
        self >= Self::WDMA0
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        match code {
            0x40..=0x46 => write!(f, "UDMA{}", code - 0x40),
            0x20..=0x22 => write!(f, "WDMA{}", code - 0x20),
            0x08..=0x0c => write!(f, "PIO{}", code - 0x08),
            _ => write!(f, "MODE{:#04x}", code),
        }
    }
}

impl FromStr for TransferMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let (base, highest, number) = if let Some(n) = upper.strip_prefix("UDMA") {
            (Self::UDMA0.0, 6, n)
        } else if let Some(n) = upper.strip_prefix("WDMA") {
            (Self::WDMA0.0, 2, n)
        } else if let Some(n) = upper.strip_prefix("PIO") {
            (Self::PIO0.0, 4, n)
        } else {
            return Err(ProtocolError::InvalidTransferMode(s.to_string()));
        };

        match number.parse::<u8>() {
            Ok(n) if n <= highest => Ok(Self(base + n)),
            _ => Err(ProtocolError::InvalidTransferMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for TransferMode {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TransferMode> for String {
    fn from(mode: TransferMode) -> String {
        mode.to_string()
    }
}
