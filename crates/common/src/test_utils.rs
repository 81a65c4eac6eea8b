//! Test utilities for ata-probe
//!
//! Provides canned completions and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{reset_completion, sample_ata_identify};
//! use protocol::{RequestId, SIG_ATA};
//!
//! let done = reset_completion(RequestId(1), SIG_ATA);
//! assert_eq!(done.registers.signature(), SIG_ATA);
//! assert_eq!(sample_ata_identify().len(), 512);
//! ```

use crate::blocks::{IdentifyBlock, InquiryBlock};
use bytes::Bytes;
use protocol::{Completion, CompletionStatus, RequestId, TaskFile};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Successful RESET carrying `signature`
pub fn reset_completion(id: RequestId, signature: u16) -> Completion {
    Completion::ok(id).registers(TaskFile::with_signature(signature))
}

/// Successful data-in command
pub fn data_completion(id: RequestId, data: impl Into<Bytes>) -> Completion {
    Completion::ok(id).data(data)
}

/// Successful READ PORT MULTIPLIER returning `value`
pub fn register_completion(id: RequestId, value: u32) -> Completion {
    Completion::ok(id).registers(TaskFile::with_register_value(value))
}

/// Command aborted by the device
pub fn abort_completion(id: RequestId) -> Completion {
    Completion::with_status(
        id,
        CompletionStatus::DeviceError {
            status: 0x51,
            error: 0x04,
        },
    )
}

/// Command timed out and error recovery froze the queue
pub fn frozen_timeout(id: RequestId) -> Completion {
    Completion::with_status(id, CompletionStatus::Timeout).frozen()
}

/// IDENTIFY block of a modern SATA disk (UDMA6, PIO4, SATA gen 3)
pub fn sample_ata_identify() -> Bytes {
    sample_ata_identify_with_serial("WD-WCC3F1234567")
}

/// Same disk model with a different serial number
pub fn sample_ata_identify_with_serial(serial: &str) -> Bytes {
    IdentifyBlock::ata("WDC WD10EZEX-08WN4A0")
        .serial(serial)
        .revision("01.01A01")
        .udma(6)
        .pio(4)
        .iordy(true)
        .sata(3)
        .ata_version(8)
        .build()
}

/// IDENTIFY PACKET block of an optical drive
pub fn sample_atapi_identify() -> Bytes {
    IdentifyBlock::atapi("HL-DT-ST DVDRAM GH24NSD1")
        .serial("K1234567890")
        .revision("LG00")
        .udma(5)
        .pio(4)
        .iordy(true)
        .sata(1)
        .build()
}

/// IDENTIFY block of an old parallel disk that only knows PIO2 without IORDY
pub fn sample_legacy_identify() -> Bytes {
    IdentifyBlock::ata("CONNER CFS420A")
        .serial("CA1234")
        .revision("1.00")
        .pio(2)
        .iordy(false)
        .ata_version(1)
        .build()
}

/// Standard INQUIRY of an optical drive, `extra` vendor bytes beyond 36
pub fn sample_inquiry(extra: usize) -> Bytes {
    InquiryBlock::cdrom("HL-DT-ST", "DVDRAM GH24NSD1", "LG00")
        .extra(extra)
        .build()
}

/// Run an async test with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
