//! Per-device probe state machine
//!
//! A [`Prober`] walks one address through
//! RESET → IDENTIFY → SETMODE → (INQUIRY → FULL_INQUIRY) for ATA and ATAPI
//! devices, or RESET → PM_PID → PM_PRV at the port-multiplier slot. Exactly
//! one command is outstanding at a time. Transitions take the device record
//! and a completion and return the [`Action`]s the engine must carry out,
//! so every step can be exercised without a transport.

use crate::config::ProbeConfig;
use crate::notify::Notification;
use crate::quirks::{QuirkFlags, find_quirk};
use crate::registry::DeviceRecord;
use crate::retry::{ErrorClass, RetryBudget, classify};
use crate::scan::ScanId;
use protocol::{
    AtaCommand, Completion, DevicePath, IdentifyData, IdentityDigest, InquiryData,
    PM_GSCR_PRODUCT_ID, PM_GSCR_REVISION, PORT_MULTIPLIER_TARGET, Protocol, SHORT_INQUIRY_LENGTH,
    SignatureClass, TargetAddress, TransferMode, TransportKind, TransportParams,
    classify_signature,
};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Probe states in the order a run visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeState {
    Reset,
    Identify,
    SetMode,
    Inquiry,
    FullInquiry,
    PmPid,
    PmPrv,
    /// Terminal
    Invalid,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reset => "RESET",
            Self::Identify => "IDENTIFY",
            Self::SetMode => "SETMODE",
            Self::Inquiry => "INQUIRY",
            Self::FullInquiry => "FULL_INQUIRY",
            Self::PmPid => "PM_PID",
            Self::PmPrv => "PM_PRV",
            Self::Invalid => "INVALID",
        };
        f.write_str(name)
    }
}

/// Terminal result of one probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The device answered every step and is configured
    Configured,
    /// Nothing usable at the address
    Failed,
}

/// Answer to a probe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub path: DevicePath,
    pub result: ProbeResult,
    pub protocol: Protocol,
}

impl ProbeOutcome {
    pub fn is_configured(&self) -> bool {
        self.result == ProbeResult::Configured
    }
}

/// Who is waiting for a probe run
#[derive(Debug)]
pub enum ProbeOrigin {
    /// A bus scan stepping through its targets
    Scan(ScanId),
    /// A caller of `start_address_probe`
    External(oneshot::Sender<ProbeOutcome>),
}

/// One queued request to probe an address
#[derive(Debug)]
pub struct ProbeRequest {
    pub origin: ProbeOrigin,
    /// Caller expects a different device; suppress found/changed announcements
    pub expect_identity_change: bool,
}

impl ProbeRequest {
    pub fn scan(id: ScanId) -> Self {
        Self {
            origin: ProbeOrigin::Scan(id),
            expect_identity_change: false,
        }
    }

    pub fn external(sender: oneshot::Sender<ProbeOutcome>, expect_identity_change: bool) -> Self {
        Self {
            origin: ProbeOrigin::External(sender),
            expect_identity_change,
        }
    }
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Submit(AtaCommand),
    FreezeQueue,
    ReleaseQueue { run_now: bool },
    SetTransportParams(TransportParams),
    Notify(Notification),
    Finished(ProbeResult),
}

/// Probe context of one address
#[derive(Debug)]
pub struct Prober {
    path: DevicePath,
    state: ProbeState,
    pending: VecDeque<ProbeRequest>,
    /// Command of the current state, re-sent on retry
    saved: Option<AtaCommand>,
    /// Identity of a configured device before this run
    digest_before: Option<IdentityDigest>,
    no_announce: bool,
    retries: RetryBudget,
    pm_product_id: u32,
    /// A queue hold taken at start that must be released on termination
    holding_queue: bool,
    visited: Vec<ProbeState>,
}

impl Prober {
    pub fn new(path: DevicePath, request: ProbeRequest, command_retries: u32) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(request);
        Self {
            path,
            state: ProbeState::Invalid,
            pending,
            saved: None,
            digest_before: None,
            no_announce: false,
            retries: RetryBudget::new(command_retries),
            pm_product_id: 0,
            holding_queue: false,
            visited: Vec::new(),
        }
    }

    pub fn path(&self) -> DevicePath {
        self.path
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// States entered by the current run, in order
    pub fn visited(&self) -> &[ProbeState] {
        &self.visited
    }

    /// Queue another request behind the one being served
    pub fn enqueue(&mut self, request: ProbeRequest) {
        self.pending.push_back(request);
    }

    /// Requests waiting, including the one being served
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Remove the request that the finished run answered
    pub fn pop_request(&mut self) -> Option<ProbeRequest> {
        self.pending.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Begin a run for the request at the head of the queue
    pub fn start(&mut self, record: &mut DeviceRecord) -> Vec<Action> {
        let mut actions = Vec::new();
        self.no_announce = self
            .pending
            .front()
            .map(|r| r.expect_identity_change)
            .unwrap_or(false);
        self.digest_before = None;
        self.pm_product_id = 0;
        self.visited.clear();

        if record.is_configured() {
            self.holding_queue = true;
            actions.push(Action::FreezeQueue);
        }

        let first = match self.path.target {
            TargetAddress::PortMultiplierReserved => ProbeState::Reset,
            TargetAddress::Ordinary(_) if record.unconfigured => ProbeState::Reset,
            TargetAddress::Ordinary(_) => ProbeState::Identify,
        };
        debug!(
            "{}: probe start in {} (configured: {}, no_announce: {})",
            self.path,
            first,
            record.is_configured(),
            self.no_announce
        );

        match first {
            ProbeState::Identify => self.enter_identify(record, &mut actions),
            _ => self.enter(ProbeState::Reset, AtaCommand::Reset, &mut actions),
        }
        actions
    }

    /// Advance on the completion of the outstanding command
    pub fn on_completion(
        &mut self,
        record: &mut DeviceRecord,
        completion: &Completion,
        config: &ProbeConfig,
    ) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.state == ProbeState::Invalid {
            warn!("{}: completion after probe finished, ignored", self.path);
            return actions;
        }

        if completion.queue_frozen {
            actions.push(Action::ReleaseQueue { run_now: true });
        }

        match classify(&completion.status) {
            None => self.on_success(record, completion, config, &mut actions),
            Some(ErrorClass::Transient) if self.retries.try_consume() => {
                debug!(
                    "{}: {} {}, retry {} of {}",
                    self.path,
                    self.state,
                    completion.status,
                    self.retries.used(),
                    config.command_retries
                );
                if let Some(command) = self.saved {
                    actions.push(Action::Submit(command));
                }
            }
            Some(class) => {
                if class == ErrorClass::Transient {
                    warn!(
                        "{}: {} {}, retries exhausted",
                        self.path, self.state, completion.status
                    );
                } else {
                    debug!("{}: {} {}", self.path, self.state, completion.status);
                }
                self.on_failure(record, config, &mut actions);
            }
        }
        actions
    }

    fn on_success(
        &mut self,
        record: &mut DeviceRecord,
        completion: &Completion,
        config: &ProbeConfig,
        actions: &mut Vec<Action>,
    ) {
        match self.state {
            ProbeState::Reset => self.reset_done(record, completion, actions),
            ProbeState::Identify => self.identify_done(record, completion, config, actions),
            ProbeState::SetMode => {
                let mode = match self.saved {
                    Some(AtaCommand::SetTransferMode(mode)) => mode,
                    _ => TransferMode::PIO0,
                };
                self.mode_set(record, mode, actions);
            }
            ProbeState::Inquiry | ProbeState::FullInquiry => {
                self.inquiry_done(record, completion, actions)
            }
            ProbeState::PmPid => {
                self.pm_product_id = completion.registers.register_value();
                debug!("{}: PM product id {:08x}", self.path, self.pm_product_id);
                self.enter(
                    ProbeState::PmPrv,
                    AtaCommand::PmRead {
                        port: PORT_MULTIPLIER_TARGET,
                        register: PM_GSCR_REVISION,
                    },
                    actions,
                );
            }
            ProbeState::PmPrv => {
                let revision = completion.registers.register_value();
                record.identify = Some(IdentifyData::port_multiplier(self.pm_product_id, revision));
                record.protocol_version = pm_protocol_level(revision);
                self.finalize(record, actions);
            }
            ProbeState::Invalid => {}
        }
    }

    fn reset_done(
        &mut self,
        record: &mut DeviceRecord,
        completion: &Completion,
        actions: &mut Vec<Action>,
    ) {
        let signature = completion.registers.signature();
        let class = classify_signature(self.path.target, signature);
        if let Some(protocol) = class.protocol() {
            record.protocol = protocol;
        }
        match class {
            SignatureClass::Ata | SignatureClass::Atapi => self.enter_identify(record, actions),
            SignatureClass::PortMultiplier => {
                actions.push(Action::SetTransportParams(TransportParams::pm_present(true)));
                self.enter(
                    ProbeState::PmPid,
                    AtaCommand::PmRead {
                        port: PORT_MULTIPLIER_TARGET,
                        register: PM_GSCR_PRODUCT_ID,
                    },
                    actions,
                );
            }
            SignatureClass::Unexpected(sig) => {
                match self.path.target {
                    TargetAddress::Ordinary(_) => {
                        warn!("{}: unexpected signature {:#06x}", self.path, sig);
                    }
                    TargetAddress::PortMultiplierReserved => {
                        debug!("{}: no port multiplier (signature {:#06x})", self.path, sig);
                    }
                }
                self.device_fail(record, actions);
            }
        }
    }

    fn identify_done(
        &mut self,
        record: &mut DeviceRecord,
        completion: &Completion,
        config: &ProbeConfig,
        actions: &mut Vec<Action>,
    ) {
        let ident = match IdentifyData::parse(&completion.data) {
            Ok(ident) => ident,
            Err(e) => {
                warn!("{}: bad IDENTIFY data: {}", self.path, e);
                return self.device_fail(record, actions);
            }
        };

        if let Some(before) = self.digest_before.take() {
            let after = ident.digest();
            if before != after {
                info!(
                    "{}: identity changed ({} -> {}), now {}",
                    self.path, before, after, ident.model
                );
                // The old device is gone even though this probe carries on
                if !self.no_announce {
                    actions.push(Action::Notify(Notification::DeviceLost));
                    actions.push(Action::Notify(Notification::IdentityChanged));
                }
                record.mark_unconfigured();
            }
        }

        let quirk = find_quirk(&ident.model, &ident.revision);
        let limit = config.max_mode.min(quirk.mode_limit());
        let mode = ident.max_mode(limit);
        debug!(
            "{}: {} \"{}\" rev {} serial {}, mode limit {}",
            self.path, record.protocol, ident.model, ident.revision, ident.serial, limit
        );

        record.quirk = quirk;
        record.identify = Some(ident);
        self.enter(
            ProbeState::SetMode,
            AtaCommand::SetTransferMode(mode),
            actions,
        );
    }

    fn mode_set(&mut self, record: &mut DeviceRecord, mode: TransferMode, actions: &mut Vec<Action>) {
        record.mode = Some(mode);
        let params = TransportParams::mode(mode);
        actions.push(Action::SetTransportParams(params));
        actions.push(Action::Notify(Notification::NegotiationChanged(params)));

        match record.protocol {
            Protocol::Atapi => self.enter(
                ProbeState::Inquiry,
                AtaCommand::Inquiry {
                    length: SHORT_INQUIRY_LENGTH,
                },
                actions,
            ),
            _ => self.finalize(record, actions),
        }
    }

    fn inquiry_done(
        &mut self,
        record: &mut DeviceRecord,
        completion: &Completion,
        actions: &mut Vec<Action>,
    ) {
        let inquiry = match InquiryData::parse(&completion.data) {
            Ok(inquiry) => inquiry,
            Err(e) => {
                warn!("{}: bad INQUIRY data: {}", self.path, e);
                return self.device_fail(record, actions);
            }
        };
        if !inquiry.is_connected() {
            debug!(
                "{}: peripheral qualifier {} reports no unit",
                self.path, inquiry.peripheral_qualifier
            );
            return self.device_fail(record, actions);
        }

        let escalate = self.state == ProbeState::Inquiry
            && inquiry.has_more_data()
            && !record.quirk.flags.contains(QuirkFlags::SHORT_INQUIRY_ONLY);
        let full_length = inquiry.full_length();
        record.inquiry = Some(inquiry);

        if escalate {
            self.enter(
                ProbeState::FullInquiry,
                AtaCommand::Inquiry {
                    length: full_length,
                },
                actions,
            );
        } else {
            self.finalize(record, actions);
        }
    }

    fn on_failure(
        &mut self,
        record: &mut DeviceRecord,
        config: &ProbeConfig,
        actions: &mut Vec<Action>,
    ) {
        if self.state == ProbeState::SetMode {
            if let Some(ident) = record.identify.as_ref() {
                if config.legacy_mode.exempts(ident) {
                    let mode = ident.max_pio_mode();
                    debug!(
                        "{}: legacy device rejected SETMODE, keeping {}",
                        self.path, mode
                    );
                    return self.mode_set(record, mode, actions);
                }
            }
        }
        self.device_fail(record, actions);
    }

    fn device_fail(&mut self, record: &mut DeviceRecord, actions: &mut Vec<Action>) {
        if record.is_configured() {
            info!("{}: lost device {}", self.path, record.model());
            actions.push(Action::Notify(Notification::DeviceLost));
        }
        record.mark_unconfigured();
        self.finish(ProbeResult::Failed, actions);
    }

    fn finalize(&mut self, record: &mut DeviceRecord, actions: &mut Vec<Action>) {
        let newly_configured = record.mark_configured();

        let params = settings_for(record);
        record.protocol_version = params.protocol_version.unwrap_or(0);
        record.transport = params.transport;
        record.transport_version = params.transport_version.unwrap_or(0);
        actions.push(Action::SetTransportParams(params));

        if newly_configured {
            info!(
                "{}: {} device \"{}\" configured",
                self.path,
                record.protocol,
                record.model()
            );
            if !self.no_announce {
                actions.push(Action::Notify(Notification::DeviceFound));
            }
        }
        self.finish(ProbeResult::Configured, actions);
    }

    fn finish(&mut self, result: ProbeResult, actions: &mut Vec<Action>) {
        debug!("{}: probe finished in {}: {:?}", self.path, self.state, result);
        self.state = ProbeState::Invalid;
        self.saved = None;
        if std::mem::take(&mut self.holding_queue) {
            actions.push(Action::ReleaseQueue { run_now: true });
        }
        actions.push(Action::Finished(result));
    }

    fn enter_identify(&mut self, record: &DeviceRecord, actions: &mut Vec<Action>) {
        if record.is_configured() {
            self.digest_before = record.digest();
        }
        let command = match record.protocol {
            Protocol::Atapi => AtaCommand::AtapiIdentify,
            _ => AtaCommand::Identify,
        };
        self.enter(ProbeState::Identify, command, actions);
    }

    fn enter(&mut self, state: ProbeState, command: AtaCommand, actions: &mut Vec<Action>) {
        self.state = state;
        self.visited.push(state);
        self.retries.reset();
        self.saved = Some(command);
        actions.push(Action::Submit(command));
    }
}

/// Protocol and transport versions of a configured record
fn settings_for(record: &DeviceRecord) -> TransportParams {
    let mut params = TransportParams {
        protocol: Some(record.protocol),
        ..TransportParams::default()
    };
    match record.protocol {
        Protocol::PortMultiplier => {
            params.protocol_version = Some(record.protocol_version);
            params.transport = Some(TransportKind::Sata);
        }
        Protocol::Atapi => {
            params.protocol_version = record.inquiry.as_ref().map(|inq| inq.version);
        }
        _ => {
            params.protocol_version = record.identify.as_ref().map(IdentifyData::ata_version);
        }
    }
    if let Some(ident) = record.identify.as_ref() {
        if record.protocol != Protocol::PortMultiplier {
            let (transport, version) = ident.transport();
            params.transport = Some(transport);
            params.transport_version = Some(version);
        }
    }
    params
}

/// Port multiplier revision level from GSCR[1]: 1.0, 1.1 or 1.2
fn pm_protocol_level(revision: u32) -> u8 {
    if revision & 0x08 != 0 {
        3
    } else if revision & 0x04 != 0 {
        2
    } else if revision & 0x02 != 0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::*;
    use protocol::{BusId, CompletionStatus, RequestId, SIG_ATA, SIG_ATAPI, SIG_PORT_MULTIPLIER};

    const ID: RequestId = RequestId(1);

    fn prober(target: TargetAddress) -> (Prober, DeviceRecord) {
        let path = DevicePath::new(BusId(0), target);
        let (tx, _rx) = oneshot::channel();
        (
            Prober::new(path, ProbeRequest::external(tx, false), 4),
            DeviceRecord::new(path),
        )
    }

    fn submitted(actions: &[Action]) -> Option<AtaCommand> {
        actions.iter().find_map(|a| match a {
            Action::Submit(cmd) => Some(*cmd),
            _ => None,
        })
    }

    #[test]
    fn test_unconfigured_starts_with_reset() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        let actions = p.start(&mut record);
        assert_eq!(actions, vec![Action::Submit(AtaCommand::Reset)]);
        assert_eq!(p.state(), ProbeState::Reset);
    }

    #[test]
    fn test_ata_signature_goes_to_identify() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(3));
        let config = ProbeConfig::default();
        p.start(&mut record);

        let actions = p.on_completion(&mut record, &reset_completion(ID, SIG_ATA), &config);
        assert_eq!(p.state(), ProbeState::Identify);
        assert_eq!(record.protocol, Protocol::Ata);
        assert_eq!(submitted(&actions), Some(AtaCommand::Identify));
    }

    #[test]
    fn test_atapi_signature_uses_packet_identify() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(1));
        let config = ProbeConfig::default();
        p.start(&mut record);

        let actions = p.on_completion(&mut record, &reset_completion(ID, SIG_ATAPI), &config);
        assert_eq!(record.protocol, Protocol::Atapi);
        assert_eq!(submitted(&actions), Some(AtaCommand::AtapiIdentify));
    }

    #[test]
    fn test_pm_signature_at_reserved_slot() {
        let (mut p, mut record) = prober(TargetAddress::PortMultiplierReserved);
        let config = ProbeConfig::default();
        p.start(&mut record);

        let actions = p.on_completion(
            &mut record,
            &reset_completion(ID, SIG_PORT_MULTIPLIER),
            &config,
        );
        assert_eq!(p.state(), ProbeState::PmPid);
        assert_eq!(
            actions,
            vec![
                Action::SetTransportParams(TransportParams::pm_present(true)),
                Action::Submit(AtaCommand::PmRead {
                    port: 15,
                    register: 0
                }),
            ]
        );
    }

    #[test]
    fn test_pm_signature_at_ordinary_address_fails() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(3));
        let config = ProbeConfig::default();
        p.start(&mut record);

        let actions = p.on_completion(
            &mut record,
            &reset_completion(ID, SIG_PORT_MULTIPLIER),
            &config,
        );
        assert_eq!(actions, vec![Action::Finished(ProbeResult::Failed)]);
        assert_eq!(p.state(), ProbeState::Invalid);
        assert!(record.unconfigured);
    }

    #[test]
    fn test_ata_path_configures_device() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        let config = ProbeConfig::default();
        p.start(&mut record);
        p.on_completion(&mut record, &reset_completion(ID, SIG_ATA), &config);

        let actions = p.on_completion(&mut record, &data_completion(ID, sample_ata_identify()), &config);
        assert_eq!(
            submitted(&actions),
            Some(AtaCommand::SetTransferMode(TransferMode::UDMA6))
        );

        let actions = p.on_completion(&mut record, &Completion::ok(ID), &config);
        assert!(record.is_configured());
        assert_eq!(record.mode, Some(TransferMode::UDMA6));
        assert_eq!(record.transport, Some(TransportKind::Sata));
        assert_eq!(record.transport_version, 3);
        assert_eq!(record.protocol_version, 8);
        assert!(actions.contains(&Action::Notify(Notification::DeviceFound)));
        assert_eq!(actions.last(), Some(&Action::Finished(ProbeResult::Configured)));
        assert_eq!(
            p.visited(),
            &[ProbeState::Reset, ProbeState::Identify, ProbeState::SetMode]
        );
    }

    #[test]
    fn test_config_caps_mode() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        let config = ProbeConfig {
            max_mode: TransferMode::UDMA4,
            ..ProbeConfig::default()
        };
        p.start(&mut record);
        p.on_completion(&mut record, &reset_completion(ID, SIG_ATA), &config);
        let actions = p.on_completion(&mut record, &data_completion(ID, sample_ata_identify()), &config);
        assert_eq!(
            submitted(&actions),
            Some(AtaCommand::SetTransferMode(TransferMode::UDMA4))
        );
    }

    #[test]
    fn test_transient_error_retries_same_command() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        let config = ProbeConfig::default();
        p.start(&mut record);
        p.on_completion(&mut record, &reset_completion(ID, SIG_ATA), &config);

        let timeout = Completion::with_status(ID, CompletionStatus::Timeout);
        for _ in 0..4 {
            let actions = p.on_completion(&mut record, &timeout, &config);
            assert_eq!(actions, vec![Action::Submit(AtaCommand::Identify)]);
            assert_eq!(p.state(), ProbeState::Identify);
        }
        let actions = p.on_completion(&mut record, &timeout, &config);
        assert_eq!(actions, vec![Action::Finished(ProbeResult::Failed)]);
    }

    #[test]
    fn test_frozen_queue_released_first() {
        let config = ProbeConfig {
            command_retries: 0,
            ..ProbeConfig::default()
        };
        let path = DevicePath::new(BusId(0), TargetAddress::Ordinary(0));
        let (tx, _rx) = oneshot::channel();
        let mut p = Prober::new(path, ProbeRequest::external(tx, false), config.command_retries);
        let mut record = DeviceRecord::new(path);
        p.start(&mut record);

        let actions = p.on_completion(&mut record, &frozen_timeout(ID), &config);
        assert_eq!(
            actions,
            vec![
                Action::ReleaseQueue { run_now: true },
                Action::Finished(ProbeResult::Failed)
            ]
        );
    }

    #[test]
    fn test_legacy_setmode_rejection_is_success() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        let config = ProbeConfig::default();
        p.start(&mut record);
        p.on_completion(&mut record, &reset_completion(ID, SIG_ATA), &config);
        let actions =
            p.on_completion(&mut record, &data_completion(ID, sample_legacy_identify()), &config);
        assert_eq!(
            submitted(&actions),
            Some(AtaCommand::SetTransferMode(TransferMode::PIO2))
        );

        let actions = p.on_completion(&mut record, &abort_completion(ID), &config);
        assert_eq!(record.mode, Some(TransferMode::PIO2));
        assert_eq!(actions.last(), Some(&Action::Finished(ProbeResult::Configured)));
    }

    #[test]
    fn test_setmode_rejection_on_modern_device_fails() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        let config = ProbeConfig::default();
        p.start(&mut record);
        p.on_completion(&mut record, &reset_completion(ID, SIG_ATA), &config);
        p.on_completion(&mut record, &data_completion(ID, sample_ata_identify()), &config);

        let actions = p.on_completion(&mut record, &abort_completion(ID), &config);
        assert_eq!(actions, vec![Action::Finished(ProbeResult::Failed)]);
        assert!(record.identify.is_none());
    }

    #[test]
    fn test_configured_device_starts_at_identify_with_queue_hold() {
        let (mut p, mut record) = prober(TargetAddress::Ordinary(0));
        record.protocol = Protocol::Ata;
        record.identify = Some(IdentifyData::parse(&sample_ata_identify()).unwrap());
        record.mark_configured();

        let actions = p.start(&mut record);
        assert_eq!(
            actions,
            vec![Action::FreezeQueue, Action::Submit(AtaCommand::Identify)]
        );

        let config = ProbeConfig::default();
        p.on_completion(&mut record, &data_completion(ID, sample_ata_identify()), &config);
        let actions = p.on_completion(&mut record, &Completion::ok(ID), &config);
        // Same identity: no found, no change
        assert!(!actions.iter().any(|a| matches!(
            a,
            Action::Notify(Notification::DeviceFound | Notification::IdentityChanged)
        )));
        assert_eq!(
            &actions[actions.len() - 2..],
            &[
                Action::ReleaseQueue { run_now: true },
                Action::Finished(ProbeResult::Configured)
            ]
        );
    }

    #[test]
    fn test_pm_registers_build_identity() {
        let (mut p, mut record) = prober(TargetAddress::PortMultiplierReserved);
        let config = ProbeConfig::default();
        p.start(&mut record);
        p.on_completion(&mut record, &reset_completion(ID, SIG_PORT_MULTIPLIER), &config);
        p.on_completion(&mut record, &register_completion(ID, 0x3726_1095), &config);
        let actions = p.on_completion(&mut record, &register_completion(ID, 0x000e), &config);

        let ident = record.identify.as_ref().unwrap();
        assert_eq!(ident.model, "Port Multiplier 37261095");
        assert_eq!(ident.revision, "000e");
        assert_eq!(record.protocol_version, 3);
        assert_eq!(record.transport, Some(TransportKind::Sata));
        assert_eq!(actions.last(), Some(&Action::Finished(ProbeResult::Configured)));
    }

    #[test]
    fn test_pm_protocol_level() {
        assert_eq!(pm_protocol_level(0x0002), 1);
        assert_eq!(pm_protocol_level(0x0006), 2);
        assert_eq!(pm_protocol_level(0x000e), 3);
        assert_eq!(pm_protocol_level(0), 0);
    }
}
