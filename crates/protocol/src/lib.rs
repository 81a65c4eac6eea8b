//! Wire vocabulary for ATA/SATA device discovery
//!
//! This crate defines the values the discovery core exchanges with a
//! transport: bus addresses, probe commands, request/completion records,
//! reset signatures and the IDENTIFY/INQUIRY structures the core decodes.
//! It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{SignatureClass, TargetAddress, TaskFile, classify_signature};
//!
//! let registers = TaskFile::with_signature(0xeb14);
//! let class = classify_signature(TargetAddress::Ordinary(0), registers.signature());
//! assert_eq!(class, SignatureClass::Atapi);
//! ```

pub mod command;
pub mod error;
pub mod ident;
pub mod inquiry;
pub mod integrity;
pub mod settings;
pub mod signature;
pub mod types;

pub use command::{
    AtaCommand, Completion, CompletionStatus, IDENTIFY_DATA_LENGTH, PM_GSCR_PRODUCT_ID,
    PM_GSCR_REVISION, Request, RequestId, SHORT_INQUIRY_LENGTH, TaskFile,
};
pub use error::{ProtocolError, Result};
pub use ident::IdentifyData;
pub use inquiry::InquiryData;
pub use integrity::IdentityDigest;
pub use settings::{PathCapability, TransportParams};
pub use signature::{
    SIG_ATA, SIG_ATAPI, SIG_PORT_MULTIPLIER, SignatureClass, classify_signature,
};
pub use types::{
    BusId, DevicePath, MAX_ORDINARY_TARGETS, PORT_MULTIPLIER_TARGET, Protocol, TargetAddress,
    TransferMode, TransportKind,
};
