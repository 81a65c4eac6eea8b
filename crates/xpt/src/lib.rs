//! ATA/SATA device discovery core
//!
//! Walks a bus, works out what answers at each target and negotiates its
//! transfer settings. All I/O goes through a [`Transport`]; the host
//! reports completions with [`Xpt::complete`] and learns about devices
//! through a [`Notifier`].
//!
//! # Example
//!
//! ```
//! use protocol::{BusId, PathCapability};
//! use xpt::testing::MockTransport;
//! use xpt::{ProbeConfig, Xpt, XptEvent};
//!
//! let transport = MockTransport::new().with_bus(BusId(0), PathCapability::sata_port(false));
//! let mut xpt = Xpt::new(transport, Vec::<XptEvent>::new(), ProbeConfig::default()).unwrap();
//! let _scan = xpt.start_bus_scan(BusId(0)).unwrap();
//!
//! // Target 0 gets a RESET first
//! assert_eq!(xpt.transport().outstanding().len(), 1);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod probe;
pub mod quirks;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod testing;
pub mod transport;

pub use config::{LegacyModePolicy, ProbeConfig};
pub use engine::{ProbeHandle, ScanHandle, Xpt};
pub use error::{Result, XptError};
pub use notify::{ChannelNotifier, Notification, Notifier, XptEvent};
pub use probe::{ProbeOutcome, ProbeResult, ProbeState};
pub use quirks::{Quirk, QuirkFlags};
pub use registry::{DeviceRecord, DeviceRegistry};
pub use scan::{ScanId, ScanReport};
pub use transport::{PathCapability, Transport, TransportParams};
