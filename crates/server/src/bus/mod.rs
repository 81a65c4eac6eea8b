//! Simulated ATA bus
//!
//! Devices described in the configuration answer probe commands from a
//! dedicated worker thread, keeping the Tokio runtime free for the
//! discovery engine.

pub mod device;
pub mod transport;
pub mod worker;

pub use transport::BridgeTransport;
pub use worker::spawn_bus_worker;
