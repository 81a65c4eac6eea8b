//! Bus worker thread
//!
//! The simulated bus runs in a dedicated OS thread and talks to the Tokio
//! runtime through the [`BusWorker`] end of the bridge. Requests are
//! answered in arrival order, one completion each.

use crate::bus::device::SimDevice;
use crate::config::BusSettings;
use common::{BusCommand, BusEvent, BusWorker};
use protocol::{
    AtaCommand, BusId, Completion, CompletionStatus, DevicePath, PathCapability, Request,
    TargetAddress, TaskFile, TransportParams,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Bus worker thread
///
/// Owns the simulated devices, the queue holds and the transport settings
/// pushed for every path.
pub struct BusWorkerThread {
    worker: BusWorker,
    bus: BusId,
    capability: PathCapability,
    devices: HashMap<TargetAddress, SimDevice>,
    holds: HashMap<DevicePath, u32>,
    params: HashMap<DevicePath, TransportParams>,
    fault_rate: f64,
    rng: StdRng,
}

impl BusWorkerThread {
    pub fn new(worker: BusWorker, settings: &BusSettings) -> Self {
        let mut devices = HashMap::new();
        for device in &settings.devices {
            match TargetAddress::from_raw(device.target) {
                Ok(target) => {
                    devices.insert(target, SimDevice::new(device.clone()));
                }
                Err(e) => warn!("Skipping device: {}", e),
            }
        }

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            worker,
            bus: settings.id(),
            capability: settings.capability(),
            devices,
            holds: HashMap::new(),
            params: HashMap::new(),
            fault_rate: settings.fault_rate,
            rng,
        }
    }

    /// Serve commands until Shutdown or until the bridge is dropped
    pub fn run(mut self) {
        info!(
            "Bus worker thread started: {}, {} device(s)",
            self.bus,
            self.devices.len()
        );

        loop {
            match self.worker.recv_command() {
                Ok(BusCommand::Shutdown) => {
                    info!("Bus worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    warn!("Bus command channel closed: {}", e);
                    break;
                }
            }
        }

        for (path, holds) in &self.holds {
            if *holds > 0 {
                warn!("{}: queue still held ({} holds) at shutdown", path, holds);
            }
        }
        info!("Bus worker thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: BusCommand) {
        // A panicking device model must not take the bus down
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in bus command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: BusCommand) {
        match cmd {
            BusCommand::Execute(request) => {
                let completion = self.execute(&request);
                debug!(
                    "{}: {:?} -> {}",
                    request.path, request.command, completion.status
                );
                if let Err(e) = self.worker.send_event(BusEvent::Completed(completion)) {
                    warn!("Failed to deliver completion: {}", e);
                }
            }

            BusCommand::FreezeQueue { path, count } => {
                let holds = self.holds.entry(path).or_default();
                *holds += count;
                debug!("{}: queue frozen ({} holds)", path, holds);
            }

            BusCommand::ReleaseQueue {
                path,
                count,
                run_now,
            } => {
                let holds = self.holds.entry(path).or_default();
                if *holds < count {
                    warn!(
                        "{}: release of {} holds with only {} held",
                        path, count, holds
                    );
                }
                *holds = holds.saturating_sub(count);
                debug!(
                    "{}: queue released ({} holds left, run_now {})",
                    path, holds, run_now
                );
            }

            BusCommand::SetTransportParams { path, params } => {
                let current = self.params.entry(path).or_default();
                current.merge(&params);
                debug!("{}: transport settings now {:?}", path, current);
            }

            BusCommand::PathCapability { bus, response } => {
                let capability = (bus == self.bus).then_some(self.capability);
                let _ = response.send(capability);
            }

            BusCommand::Shutdown => {
                // Handled in the run loop
            }
        }
    }

    /// Answer one request
    pub fn execute(&mut self, request: &Request) -> Completion {
        let id = request.id;
        if request.path.bus != self.bus {
            return Completion::with_status(id, CompletionStatus::NoDevice);
        }

        if self.fault_rate > 0.0 && self.rng.random_bool(self.fault_rate) {
            debug!("{}: injected timeout for {:?}", request.path, request.command);
            *self.holds.entry(request.path).or_default() += 1;
            return Completion::with_status(id, CompletionStatus::Timeout).frozen();
        }

        let target = request.path.target;
        if let Some(device) = self.devices.get_mut(&target) {
            return device.answer(request);
        }

        // With no multiplier attached, a reset at the reserved slot reaches
        // whatever sits on the bare port
        if target.is_port_multiplier() && request.command == AtaCommand::Reset {
            if let Some(device) = self.devices.get(&TargetAddress::Ordinary(0)) {
                return Completion::ok(id).registers(TaskFile::with_signature(device.signature()));
            }
        }

        Completion::with_status(id, CompletionStatus::NoDevice)
    }

    /// Queue holds currently on `path`
    #[cfg(test)]
    pub fn holds(&self, path: DevicePath) -> u32 {
        self.holds.get(&path).copied().unwrap_or(0)
    }

    /// Settings accumulated for `path`
    #[cfg(test)]
    pub fn params(&self, path: DevicePath) -> Option<&TransportParams> {
        self.params.get(&path)
    }
}

/// Spawn the bus worker thread
///
/// The thread runs until a Shutdown command arrives or the bridge is dropped.
pub fn spawn_bus_worker(
    worker: BusWorker,
    settings: BusSettings,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("bus-worker".to_string())
        .spawn(move || BusWorkerThread::new(worker, &settings).run())
}
