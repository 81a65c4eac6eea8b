//! Discovery engine
//!
//! [`Xpt`] owns the registry, the active probers and scans and the table of
//! requests in flight. Hosts call [`Xpt::complete`] for every completion the
//! transport reports; everything else happens in response.

use crate::config::ProbeConfig;
use crate::error::{Result, XptError};
use crate::notify::{Notification, Notifier};
use crate::probe::{Action, ProbeOrigin, ProbeOutcome, ProbeRequest, Prober};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::scan::{ScanAction, ScanId, ScanReport, Scanner};
use crate::transport::Transport;
use protocol::{BusId, Completion, CompletionStatus, DevicePath, Request, RequestId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Waits for the report of a bus scan
#[derive(Debug)]
pub struct ScanHandle {
    rx: oneshot::Receiver<ScanReport>,
}

impl ScanHandle {
    /// Report if the scan has finished
    pub fn try_report(&mut self) -> Option<ScanReport> {
        self.rx.try_recv().ok()
    }

    /// Wait for the scan to finish
    pub async fn report(self) -> Result<ScanReport> {
        self.rx
            .await
            .map_err(|_| XptError::Transport("scan dropped before completion".to_string()))
    }
}

/// Waits for the outcome of a single-address probe
#[derive(Debug)]
pub struct ProbeHandle {
    rx: oneshot::Receiver<ProbeOutcome>,
}

impl ProbeHandle {
    pub fn try_outcome(&mut self) -> Option<ProbeOutcome> {
        self.rx.try_recv().ok()
    }

    pub async fn outcome(self) -> Result<ProbeOutcome> {
        self.rx
            .await
            .map_err(|_| XptError::Transport("probe dropped before completion".to_string()))
    }
}

/// The discovery core
pub struct Xpt<T: Transport, N: Notifier> {
    transport: T,
    notifier: N,
    config: ProbeConfig,
    registry: DeviceRegistry,
    probes: HashMap<DevicePath, Prober>,
    inflight: HashMap<RequestId, DevicePath>,
    scans: HashMap<ScanId, Scanner>,
    /// Completions for requests the transport refused
    refused: VecDeque<Completion>,
    next_request: u64,
    next_scan: u64,
}

impl<T: Transport, N: Notifier> Xpt<T, N> {
    pub fn new(transport: T, notifier: N, config: ProbeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            notifier,
            config,
            registry: DeviceRegistry::new(),
            probes: HashMap::new(),
            inflight: HashMap::new(),
            scans: HashMap::new(),
            refused: VecDeque::new(),
            next_request: 1,
            next_scan: 1,
        })
    }

    /// Enumerate every candidate target of `bus`
    pub fn start_bus_scan(&mut self, bus: BusId) -> Result<ScanHandle> {
        let capability = self.transport.path_capability(bus)?;
        let (tx, rx) = oneshot::channel();
        let id = ScanId(self.next_scan);
        self.next_scan += 1;

        let mut scanner = Scanner::new(id, bus, capability, tx)?;
        info!(
            "{}: {} starting, {} targets, port multiplier {}",
            bus,
            id,
            capability.max_target,
            if capability.port_multiplier {
                "supported"
            } else {
                "unsupported"
            }
        );

        if !capability.initiator {
            info!("{}: no initiator role, nothing to scan", bus);
            scanner.finish();
            return Ok(ScanHandle { rx });
        }

        match scanner.first_target() {
            Some(target) => {
                self.scans.insert(id, scanner);
                self.enqueue_probe(DevicePath::new(bus, target), ProbeRequest::scan(id));
                self.complete_refused();
            }
            None => scanner.finish(),
        }
        Ok(ScanHandle { rx })
    }

    /// Probe one address, or queue behind the probe already running there
    pub fn start_address_probe(
        &mut self,
        path: DevicePath,
        expect_identity_change: bool,
    ) -> ProbeHandle {
        let (tx, rx) = oneshot::channel();
        self.enqueue_probe(path, ProbeRequest::external(tx, expect_identity_change));
        self.complete_refused();
        ProbeHandle { rx }
    }

    /// Feed a completion reported by the transport
    pub fn complete(&mut self, completion: Completion) {
        self.complete_one(completion);
        self.complete_refused();
    }

    fn complete_refused(&mut self) {
        while let Some(completion) = self.refused.pop_front() {
            self.complete_one(completion);
        }
    }

    fn complete_one(&mut self, completion: Completion) {
        let Some(path) = self.inflight.remove(&completion.id) else {
            warn!("Completion for unknown request {:?}", completion.id);
            return;
        };
        let Some(prober) = self.probes.get_mut(&path) else {
            warn!("{}: completion without an active probe", path);
            return;
        };

        let record = self.registry.get_or_create(path);
        let actions = prober.on_completion(record, &completion, &self.config);
        self.apply(path, actions);
    }

    pub fn device(&self, path: &DevicePath) -> Option<&DeviceRecord> {
        self.registry.get(path)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    /// Active prober at `path`, if any
    pub fn prober(&self, path: &DevicePath) -> Option<&Prober> {
        self.probes.get(path)
    }

    /// No probe or scan is running
    pub fn is_idle(&self) -> bool {
        self.probes.is_empty() && self.scans.is_empty()
    }

    /// Requests submitted and not yet completed
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    fn enqueue_probe(&mut self, path: DevicePath, request: ProbeRequest) {
        if let Some(prober) = self.probes.get_mut(&path) {
            prober.enqueue(request);
            debug!(
                "{}: probe busy, request queued ({} pending)",
                path,
                prober.pending_len()
            );
            return;
        }
        self.probes.insert(
            path,
            Prober::new(path, request, self.config.command_retries),
        );
        self.run_probe(path);
    }

    fn run_probe(&mut self, path: DevicePath) {
        let Some(prober) = self.probes.get_mut(&path) else {
            return;
        };
        let record = self.registry.get_or_create(path);
        let actions = prober.start(record);
        self.apply(path, actions);
    }

    fn apply(&mut self, path: DevicePath, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Submit(command) => {
                    let id = RequestId(self.next_request);
                    self.next_request += 1;
                    self.inflight.insert(id, path);
                    if let Err(e) = self.transport.submit(Request::new(id, path, command)) {
                        warn!("{}: {:?} refused by transport: {}", path, command, e);
                        self.refused
                            .push_back(Completion::with_status(id, CompletionStatus::Requeue));
                    }
                }
                Action::FreezeQueue => self.transport.freeze_queue(path, 1),
                Action::ReleaseQueue { run_now } => {
                    self.transport.release_queue(path, 1, run_now)
                }
                Action::SetTransportParams(params) => {
                    self.transport.set_transport_params(path, params)
                }
                Action::Notify(notification) => self.notify(path, notification),
                Action::Finished(result) => self.probe_finished(path, result),
            }
        }
    }

    fn notify(&mut self, path: DevicePath, notification: Notification) {
        match notification {
            Notification::DeviceFound => {
                if let Some(record) = self.registry.get(&path) {
                    self.notifier.device_found(record);
                }
            }
            Notification::DeviceLost => self.notifier.device_lost(path),
            Notification::IdentityChanged => self.notifier.device_identity_changed(path),
            Notification::NegotiationChanged(params) => {
                self.notifier.transfer_negotiation_changed(path, &params)
            }
        }
    }

    fn probe_finished(&mut self, path: DevicePath, result: crate::probe::ProbeResult) {
        let Some(prober) = self.probes.get_mut(&path) else {
            return;
        };
        let request = prober.pop_request();
        let rerun = prober.has_pending();
        if !rerun {
            self.probes.remove(&path);
        }

        let outcome = ProbeOutcome {
            path,
            result,
            protocol: self
                .registry
                .get(&path)
                .map(|r| r.protocol)
                .unwrap_or_default(),
        };

        match request.map(|r| r.origin) {
            Some(ProbeOrigin::External(tx)) => {
                let _ = tx.send(outcome);
            }
            Some(ProbeOrigin::Scan(id)) => self.scan_progress(id, &outcome),
            None => {}
        }

        if rerun {
            debug!("{}: serving next queued probe request", path);
            self.run_probe(path);
        }
    }

    fn scan_progress(&mut self, id: ScanId, outcome: &ProbeOutcome) {
        let Some(scanner) = self.scans.get_mut(&id) else {
            return;
        };
        let bus = scanner.bus();
        let actions = scanner.on_probe_done(outcome);

        for action in actions {
            match action {
                ScanAction::Probe(target) => {
                    self.enqueue_probe(DevicePath::new(bus, target), ProbeRequest::scan(id))
                }
                ScanAction::SetTransportParams(path, params) => {
                    self.transport.set_transport_params(path, params)
                }
                ScanAction::Done => {
                    if let Some(mut scanner) = self.scans.remove(&id) {
                        scanner.finish();
                    }
                }
            }
        }
    }
}
