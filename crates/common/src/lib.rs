//! Common utilities for ata-probe
//!
//! This crate provides shared functionality between the discovery core and
//! the server: error handling, logging setup, and the async channel bridge
//! to the bus thread.

pub mod blocks;
pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use blocks::{IdentifyBlock, InquiryBlock};
pub use channel::{BusBridge, BusCommand, BusEvent, BusWorker, create_bus_bridge};
pub use error::{Error, Result};
pub use logging::{setup_logging, validate_filter};
