//! Probe commands, requests and completions
//!
//! The discovery core issues a small, fixed vocabulary of commands. A
//! [`Request`] carries one of them to the transport; the transport answers
//! with a [`Completion`] holding the status, the result task-file registers
//! and any data-in payload.

use crate::types::{DevicePath, TransferMode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Allocation length of the first (conservative) INQUIRY
pub const SHORT_INQUIRY_LENGTH: u16 = 36;

/// Size of an IDENTIFY (PACKET) DEVICE response
pub const IDENTIFY_DATA_LENGTH: usize = 512;

/// Port-multiplier general status/control register: product id
pub const PM_GSCR_PRODUCT_ID: u16 = 0;

/// Port-multiplier general status/control register: revision
pub const PM_GSCR_REVISION: u16 = 1;

/// Command issued by a probe step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtaCommand {
    /// Link/device reset; completes with the signature in the task file
    Reset,
    /// IDENTIFY DEVICE
    Identify,
    /// IDENTIFY PACKET DEVICE
    AtapiIdentify,
    /// SET FEATURES / SET TRANSFER MODE
    SetTransferMode(TransferMode),
    /// SCSI INQUIRY wrapped in PACKET
    Inquiry { length: u16 },
    /// READ PORT MULTIPLIER register
    PmRead { port: u8, register: u16 },
}

impl AtaCommand {
    /// ATA opcode, `None` for the reset which is a control-block operation
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Self::Reset => None,
            Self::Identify => Some(0xec),
            Self::AtapiIdentify => Some(0xa1),
            Self::SetTransferMode(_) => Some(0xef),
            Self::Inquiry { .. } => Some(0xa0),
            Self::PmRead { .. } => Some(0xe4),
        }
    }

    /// Command timeout handed to the transport
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Reset => Duration::from_secs(15),
            Self::Identify | Self::AtapiIdentify | Self::SetTransferMode(_) => {
                Duration::from_secs(30)
            }
            Self::Inquiry { .. } => Duration::from_secs(60),
            Self::PmRead { .. } => Duration::from_secs(5),
        }
    }

    /// Bytes of data-in the command transfers
    pub fn data_length(&self) -> usize {
        match self {
            Self::Identify | Self::AtapiIdentify => IDENTIFY_DATA_LENGTH,
            Self::Inquiry { length } => *length as usize,
            _ => 0,
        }
    }
}

impl fmt::Display for AtaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => f.write_str("RESET"),
            Self::Identify => f.write_str("IDENTIFY"),
            Self::AtapiIdentify => f.write_str("ATAPI_IDENTIFY"),
            Self::SetTransferMode(mode) => write!(f, "SETFEATURES SET TRANSFER MODE {}", mode),
            Self::Inquiry { length } => write!(f, "INQUIRY({})", length),
            Self::PmRead { port, register } => write!(f, "PM_READ({}, {})", port, register),
        }
    }
}

/// Request ID for matching completions to requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// A command addressed to one device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub path: DevicePath,
    pub command: AtaCommand,
    pub timeout: Duration,
}

impl Request {
    pub fn new(id: RequestId, path: DevicePath, command: AtaCommand) -> Self {
        Self {
            id,
            path,
            command,
            timeout: command.timeout(),
        }
    }
}

/// Result task-file registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFile {
    pub status: u8,
    pub error: u8,
    pub sector_count: u8,
    pub lba_low: u8,
    pub lba_mid: u8,
    pub lba_high: u8,
}

impl TaskFile {
    /// Task file carrying a reset signature
    pub fn with_signature(signature: u16) -> Self {
        Self {
            lba_mid: (signature & 0xff) as u8,
            lba_high: (signature >> 8) as u8,
            ..Self::default()
        }
    }

    /// Task file carrying a 32-bit port-multiplier register value
    pub fn with_register_value(value: u32) -> Self {
        Self {
            sector_count: (value & 0xff) as u8,
            lba_low: ((value >> 8) & 0xff) as u8,
            lba_mid: ((value >> 16) & 0xff) as u8,
            lba_high: (value >> 24) as u8,
            ..Self::default()
        }
    }

    /// Signature reported after a reset: `lba_high:lba_mid`
    pub fn signature(&self) -> u16 {
        ((self.lba_high as u16) << 8) | self.lba_mid as u16
    }

    /// 32-bit value returned by READ PORT MULTIPLIER
    pub fn register_value(&self) -> u32 {
        ((self.lba_high as u32) << 24)
            | ((self.lba_mid as u32) << 16)
            | ((self.lba_low as u32) << 8)
            | self.sector_count as u32
    }
}

/// Completion status reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    /// Command completed without error
    Ok,
    /// Command timed out
    Timeout,
    /// Command was dropped by the transport and may be re-issued
    Requeue,
    /// Device completed the command with an error (ABRT etc.)
    DeviceError { status: u8, error: u8 },
    /// Nothing answered at the address
    NoDevice,
}

impl CompletionStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Errors that may clear up if the same command is issued again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Requeue)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Timeout => f.write_str("command timeout"),
            Self::Requeue => f.write_str("requeue request"),
            Self::DeviceError { status, error } => {
                write!(f, "device error (status {:#04x}, error {:#04x})", status, error)
            }
            Self::NoDevice => f.write_str("no device"),
        }
    }
}

/// Transport answer to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: RequestId,
    pub status: CompletionStatus,
    /// Error recovery froze the device queue while completing this request
    pub queue_frozen: bool,
    pub registers: TaskFile,
    pub data: Bytes,
}

impl Completion {
    /// Successful completion without payload
    pub fn ok(id: RequestId) -> Self {
        Self::with_status(id, CompletionStatus::Ok)
    }

    pub fn with_status(id: RequestId, status: CompletionStatus) -> Self {
        Self {
            id,
            status,
            queue_frozen: false,
            registers: TaskFile::default(),
            data: Bytes::new(),
        }
    }

    pub fn registers(mut self, registers: TaskFile) -> Self {
        self.registers = registers;
        self
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn frozen(mut self) -> Self {
        self.queue_frozen = true;
        self
    }
}
