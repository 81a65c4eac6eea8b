//! Bus enumeration
//!
//! A [`Scanner`] walks the candidate targets of one bus, one probe at a
//! time. When the bus supports port multipliers the reserved slot goes
//! first; the cursor then wraps to target 0 and climbs through the
//! ordinary targets.

use crate::error::{Result, XptError};
use crate::probe::ProbeOutcome;
use protocol::{
    BusId, DevicePath, MAX_ORDINARY_TARGETS, PORT_MULTIPLIER_TARGET, PathCapability,
    TargetAddress, TransportParams,
};
use serde::Serialize;
use std::fmt;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Identifier of an active bus scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(pub u64);

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan#{}", self.0)
    }
}

/// Summary delivered once when a bus scan ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub bus: BusId,
    /// Targets probed, in probe order
    pub probed: Vec<TargetAddress>,
    /// Paths that ended configured
    pub found: Vec<DevicePath>,
    pub port_multiplier: bool,
}

/// Next step of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanAction {
    Probe(TargetAddress),
    SetTransportParams(DevicePath, TransportParams),
    Done,
}

/// Cursor over the targets of one bus
#[derive(Debug)]
pub struct Scanner {
    id: ScanId,
    bus: BusId,
    capability: PathCapability,
    mask: u16,
    counter: u8,
    probed: Vec<TargetAddress>,
    found: Vec<DevicePath>,
    port_multiplier: bool,
    waiter: Option<oneshot::Sender<ScanReport>>,
}

impl Scanner {
    pub fn new(
        id: ScanId,
        bus: BusId,
        capability: PathCapability,
        waiter: oneshot::Sender<ScanReport>,
    ) -> Result<Self> {
        if capability.max_target > MAX_ORDINARY_TARGETS {
            return Err(XptError::InvalidTopology {
                bus,
                max_target: capability.max_target,
            });
        }

        let mut mask = ((1u32 << capability.max_target) - 1) as u16;
        if capability.port_multiplier {
            mask |= 1 << PORT_MULTIPLIER_TARGET;
        }

        Ok(Self {
            id,
            bus,
            capability,
            mask,
            counter: 0,
            probed: Vec::new(),
            found: Vec::new(),
            port_multiplier: false,
            waiter: Some(waiter),
        })
    }

    pub fn id(&self) -> ScanId {
        self.id
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// Candidate targets as a bitmask, bit n for target n
    pub fn mask(&self) -> u16 {
        self.mask
    }

    /// First target to probe, `None` for an empty bus
    pub fn first_target(&mut self) -> Option<TargetAddress> {
        let start = if self.capability.port_multiplier {
            PORT_MULTIPLIER_TARGET
        } else {
            0
        };
        self.seek(start, true)
    }

    /// Record the outcome for the current target and pick the next step
    pub fn on_probe_done(&mut self, outcome: &ProbeOutcome) -> Vec<ScanAction> {
        let mut actions = Vec::new();
        let target = outcome.path.target;
        self.probed.push(target);
        if outcome.is_configured() {
            self.found.push(outcome.path);
        }

        match target {
            TargetAddress::PortMultiplierReserved if outcome.is_configured() => {
                info!("{}: port multiplier found, child ports belong to the transport", self.bus);
                self.port_multiplier = true;
                actions.push(ScanAction::Done);
                return actions;
            }
            TargetAddress::PortMultiplierReserved => {
                debug!("{}: no port multiplier", self.bus);
                actions.push(ScanAction::SetTransportParams(
                    DevicePath::new(self.bus, TargetAddress::PortMultiplierReserved),
                    TransportParams::pm_present(false),
                ));
            }
            TargetAddress::Ordinary(_) => {}
        }

        match self.seek((self.counter + 1) & 0x0f, false) {
            Some(next) => actions.push(ScanAction::Probe(next)),
            None => actions.push(ScanAction::Done),
        }
        actions
    }

    /// Deliver the report; later calls do nothing
    pub fn finish(&mut self) {
        let report = ScanReport {
            bus: self.bus,
            probed: std::mem::take(&mut self.probed),
            found: std::mem::take(&mut self.found),
            port_multiplier: self.port_multiplier,
        };
        if let Some(waiter) = self.waiter.take() {
            info!(
                "{}: {} finished, {} probed, {} found",
                self.bus,
                self.id,
                report.probed.len(),
                report.found.len()
            );
            let _ = waiter.send(report);
        }
    }

    /// The reserved slot is only a valid stop before the ordinary loop
    fn seek(&mut self, from: u8, allow_pm: bool) -> Option<TargetAddress> {
        let mut counter = from;
        loop {
            if counter == PORT_MULTIPLIER_TARGET {
                if !allow_pm {
                    return None;
                }
            } else if counter >= self.capability.max_target {
                return None;
            }
            if self.mask & (1 << counter) != 0 {
                self.counter = counter;
                return Some(target_at(counter));
            }
            counter = (counter + 1) & 0x0f;
        }
    }
}

fn target_at(counter: u8) -> TargetAddress {
    if counter == PORT_MULTIPLIER_TARGET {
        TargetAddress::PortMultiplierReserved
    } else {
        TargetAddress::Ordinary(counter)
    }
}
