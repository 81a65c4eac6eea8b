//! Boundary to the transport layer
//!
//! The core never blocks on the transport: `submit` only queues a request
//! and the host feeds the answer back through [`crate::Xpt::complete`].

use crate::error::Result;
use protocol::{BusId, DevicePath, Request};

pub use protocol::{PathCapability, TransportParams};

/// Operations the discovery core needs from the layer that talks to hardware
pub trait Transport {
    /// Queue a request; its completion arrives later
    ///
    /// A request the transport refuses is completed by the core itself as
    /// a requeue.
    fn submit(&mut self, request: Request) -> Result<()>;

    /// Describe a bus
    fn path_capability(&self, bus: BusId) -> Result<PathCapability>;

    /// Add `count` holds to the device queue of `path`
    fn freeze_queue(&mut self, path: DevicePath, count: u32);

    /// Drop `count` holds; `run_now` dispatches held requests immediately
    fn release_queue(&mut self, path: DevicePath, count: u32, run_now: bool);

    /// Apply the fields set in `params`
    fn set_transport_params(&mut self, path: DevicePath, params: TransportParams);
}
