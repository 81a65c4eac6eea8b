//! Probe State Machine Tests
//!
//! Drives single-address probes through the engine against scripted
//! devices.
//!
//! # Test Scenarios
//! - Signature decoding at ordinary and reserved targets
//! - Identity change detection on re-probe, lost device reporting
//! - Requests refused by the transport
//! - Queue release on frozen failures
//! - Legacy SETMODE exemption
//! - Retries, request FIFO, ATAPI INQUIRY escalation, port multiplier registers
//!
//! Run with: `cargo test -p xpt --test probe_tests`

mod support;

use common::IdentifyBlock;
use common::test_utils::*;
use proptest::prelude::*;
use protocol::{
    AtaCommand, Completion, CompletionStatus, Protocol, SIG_ATA, SIG_PORT_MULTIPLIER,
    TargetAddress, TransferMode, TransportKind, TransportParams,
};
use support::*;
use xpt::testing::TransportCall;
use xpt::{ProbeConfig, ProbeResult, ProbeState, XptEvent};

fn ata_bench(target: u8) -> Bench {
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(target),
        SimDevice::Ata {
            identify: sample_ata_identify(),
        },
    );
    bench
}

fn is_identity_changed(e: &XptEvent) -> bool {
    matches!(e, XptEvent::IdentityChanged { .. })
}

fn is_found(e: &XptEvent) -> bool {
    matches!(e, XptEvent::DeviceFound { .. })
}

fn is_lost(e: &XptEvent) -> bool {
    matches!(e, XptEvent::DeviceLost { .. })
}

// ============================================================================
// Signature Decoding
// ============================================================================

#[test]
fn test_ata_signature_at_ordinary_target() {
    let mut xpt = engine(capability(7, false));
    let _probe = xpt.start_address_probe(path(3), false);

    let reset = xpt.transport_mut().next_request().unwrap();
    assert_eq!(reset.command, AtaCommand::Reset);
    xpt.complete(reset_completion(reset.id, SIG_ATA));

    assert_eq!(
        xpt.prober(&path(3)).map(|p| p.state()),
        Some(ProbeState::Identify)
    );
    assert_eq!(xpt.device(&path(3)).unwrap().protocol, Protocol::Ata);
    assert_eq!(
        xpt.transport().outstanding().front().map(|r| r.command),
        Some(AtaCommand::Identify)
    );
}

#[test]
fn test_pm_signature_at_reserved_target() {
    let mut xpt = engine(capability(1, true));
    let _scan = xpt.start_bus_scan(BUS).unwrap();

    let reset = xpt.transport_mut().next_request().unwrap();
    assert_eq!(reset.path, pm_path());
    xpt.complete(reset_completion(reset.id, SIG_PORT_MULTIPLIER));

    assert!(
        xpt.transport()
            .params_for(pm_path())
            .contains(&TransportParams::pm_present(true))
    );
    assert_eq!(
        xpt.prober(&pm_path()).map(|p| p.state()),
        Some(ProbeState::PmPid)
    );
}

#[test]
fn test_pm_signature_at_ordinary_target_fails() {
    let mut xpt = engine(capability(7, false));
    let mut probe = xpt.start_address_probe(path(3), false);

    let reset = xpt.transport_mut().next_request().unwrap();
    xpt.complete(reset_completion(reset.id, SIG_PORT_MULTIPLIER));

    let outcome = probe.try_outcome().unwrap();
    assert_eq!(outcome.result, ProbeResult::Failed);
    assert!(xpt.transport().outstanding().is_empty());
    let record = xpt.device(&path(3)).unwrap();
    assert!(record.unconfigured);
    assert_eq!(record.protocol, Protocol::Unknown);
    assert!(xpt.notifier().is_empty());
}

#[test]
fn test_unexpected_signature_is_not_retried() {
    let mut xpt = engine(capability(7, false));
    let _probe = xpt.start_address_probe(path(0), false);

    let reset = xpt.transport_mut().next_request().unwrap();
    xpt.complete(reset_completion(reset.id, 0x1234));

    assert_eq!(commands_for(&xpt, path(0)), vec![AtaCommand::Reset]);
}

proptest! {
    #[test]
    fn prop_ordinary_target_never_becomes_pm(target in 0u8..15, sig in any::<u16>()) {
        let mut xpt = engine(capability(15, false));
        let _probe = xpt.start_address_probe(path(target), false);
        let reset = xpt.transport_mut().next_request().unwrap();
        xpt.complete(reset_completion(reset.id, sig));

        let record = xpt.device(&path(target)).unwrap();
        prop_assert_ne!(record.protocol, Protocol::PortMultiplier);
        prop_assert!(
            !xpt.transport().params_for(path(target)).iter().any(|p| p.pm_present == Some(true))
        );
    }
}

// ============================================================================
// Full Paths
// ============================================================================

#[test]
fn test_ata_probe_configures_and_announces() {
    let bench = ata_bench(0);
    let mut xpt = engine(capability(1, false));
    let mut probe = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &bench);

    assert!(probe.try_outcome().unwrap().is_configured());
    assert_eq!(
        commands_for(&xpt, path(0)),
        vec![
            AtaCommand::Reset,
            AtaCommand::Identify,
            AtaCommand::SetTransferMode(TransferMode::UDMA6),
        ]
    );

    let record = xpt.device(&path(0)).unwrap();
    assert!(record.is_configured());
    assert_eq!(record.model(), "WDC WD10EZEX-08WN4A0");
    assert_eq!(record.mode, Some(TransferMode::UDMA6));

    let params = xpt.transport().params_for(path(0));
    assert!(params.contains(&TransportParams::mode(TransferMode::UDMA6)));
    let last = params.last().unwrap();
    assert_eq!(last.protocol, Some(Protocol::Ata));
    assert_eq!(last.protocol_version, Some(8));
    assert_eq!(last.transport, Some(TransportKind::Sata));
    assert_eq!(last.transport_version, Some(3));

    let events = xpt.notifier();
    assert_eq!(count_events(events, is_found), 1);
    assert_eq!(
        count_events(events, |e| matches!(e, XptEvent::NegotiationChanged { .. })),
        1
    );
    assert!(xpt.is_idle());
}

#[test]
fn test_atapi_short_inquiry_only() {
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(1),
        SimDevice::Atapi {
            identify: sample_atapi_identify(),
            inquiry: sample_inquiry(0),
        },
    );
    let mut xpt = engine(capability(2, false));
    let mut probe = xpt.start_address_probe(path(1), false);
    settle(&mut xpt, &bench);

    assert!(probe.try_outcome().unwrap().is_configured());
    let commands = commands_for(&xpt, path(1));
    assert_eq!(commands[1], AtaCommand::AtapiIdentify);
    assert_eq!(commands.last(), Some(&AtaCommand::Inquiry { length: 36 }));

    let record = xpt.device(&path(1)).unwrap();
    assert_eq!(record.protocol, Protocol::Atapi);
    assert!(record.inquiry_valid());
    assert_eq!(record.protocol_version, 5);
}

#[test]
fn test_atapi_full_inquiry_escalation() {
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(0),
        SimDevice::Atapi {
            identify: sample_atapi_identify(),
            inquiry: sample_inquiry(60),
        },
    );
    let mut xpt = engine(capability(1, false));
    let mut probe = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &bench);

    assert!(probe.try_outcome().unwrap().is_configured());
    let commands = commands_for(&xpt, path(0));
    assert_eq!(
        &commands[commands.len() - 2..],
        &[
            AtaCommand::Inquiry { length: 36 },
            AtaCommand::Inquiry { length: 96 }
        ]
    );
    let inquiry = xpt.device(&path(0)).unwrap().inquiry.as_ref().unwrap();
    assert_eq!(inquiry.vendor, "HL-DT-ST");
}

#[test]
fn test_port_multiplier_registers() {
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::PortMultiplierReserved,
        SimDevice::PortMultiplier {
            product_id: 0x3726_1095,
            revision: 0x0006,
        },
    );
    let mut xpt = engine(capability(1, true));
    let mut probe = xpt.start_address_probe(pm_path(), false);
    settle(&mut xpt, &bench);

    assert!(probe.try_outcome().unwrap().is_configured());
    assert_eq!(
        commands_for(&xpt, pm_path()),
        vec![
            AtaCommand::Reset,
            AtaCommand::PmRead {
                port: 15,
                register: 0
            },
            AtaCommand::PmRead {
                port: 15,
                register: 1
            },
        ]
    );
    let record = xpt.device(&pm_path()).unwrap();
    assert_eq!(record.protocol, Protocol::PortMultiplier);
    assert_eq!(record.model(), "Port Multiplier 37261095");
    assert_eq!(record.identify.as_ref().unwrap().revision, "0006");
    assert_eq!(record.protocol_version, 2);
}

#[test]
fn test_states_never_repeat_within_a_run() {
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(0),
        SimDevice::Atapi {
            identify: sample_atapi_identify(),
            inquiry: sample_inquiry(60),
        },
    );
    let mut xpt = engine(capability(1, false));
    let _probe = xpt.start_address_probe(path(0), false);

    // Interleave a timeout on every state to exercise retries
    let mut timed_out = std::collections::HashSet::new();
    xpt::testing::run_until_idle(&mut xpt, 100, |request| {
        if timed_out.insert(request.command) {
            Completion::with_status(request.id, CompletionStatus::Timeout)
        } else {
            answer(&bench, request)
        }
    });

    let ranks: Vec<u8> = commands_for(&xpt, path(0))
        .into_iter()
        .map(|cmd| match cmd {
            AtaCommand::Reset => 0,
            AtaCommand::Identify | AtaCommand::AtapiIdentify => 1,
            AtaCommand::SetTransferMode(_) => 2,
            AtaCommand::Inquiry { length: 36 } => 3,
            AtaCommand::Inquiry { .. } => 4,
            AtaCommand::PmRead { register: 0, .. } => 5,
            AtaCommand::PmRead { .. } => 6,
        })
        .collect();

    // Each state twice (timeout + success), never revisited afterwards
    assert_eq!(ranks, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
}

// ============================================================================
// Identity Change Detection
// ============================================================================

fn configured_engine() -> xpt::Xpt<xpt::testing::MockTransport, Vec<XptEvent>> {
    let mut xpt = engine(capability(1, false));
    let _probe = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &ata_bench(0));
    assert!(xpt.device(&path(0)).unwrap().is_configured());
    xpt.notifier_mut().clear();
    xpt
}

#[test]
fn test_identical_reprobe_is_silent() {
    let mut xpt = configured_engine();
    let mut probe = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &ata_bench(0));

    assert!(probe.try_outcome().unwrap().is_configured());
    assert_eq!(count_events(xpt.notifier(), is_identity_changed), 0);
    assert_eq!(count_events(xpt.notifier(), is_found), 0);
    assert_eq!(count_events(xpt.notifier(), is_lost), 0);

    // Re-probe of a configured device skips RESET
    let commands = commands_for(&xpt, path(0));
    assert_eq!(commands[3], AtaCommand::Identify);
    assert_eq!(commands.len(), 5);
}

#[test]
fn test_changed_identity_is_reported_once() {
    let mut xpt = configured_engine();
    let before = xpt.device(&path(0)).unwrap().digest();

    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(0),
        SimDevice::Ata {
            identify: sample_ata_identify_with_serial("WD-WCC3F7654321"),
        },
    );
    let mut probe = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &bench);

    assert!(probe.try_outcome().unwrap().is_configured());
    assert_eq!(count_events(xpt.notifier(), is_identity_changed), 1);
    assert_eq!(count_events(xpt.notifier(), is_found), 1);
    assert_eq!(count_events(xpt.notifier(), is_lost), 1);

    // The replaced device is reported gone before the new one is found
    let events = xpt.notifier();
    let lost = events.iter().position(is_lost).unwrap();
    let found = events.iter().position(is_found).unwrap();
    assert!(lost < found);

    let record = xpt.device(&path(0)).unwrap();
    assert!(record.is_configured());
    assert_eq!(record.identify.as_ref().unwrap().serial, "WD-WCC3F7654321");
    assert_ne!(record.digest(), before);
}

#[test]
fn test_expected_identity_change_is_not_announced() {
    let mut xpt = configured_engine();
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(0),
        SimDevice::Ata {
            identify: sample_ata_identify_with_serial("WD-REPLACED"),
        },
    );
    let mut probe = xpt.start_address_probe(path(0), true);
    settle(&mut xpt, &bench);

    assert!(probe.try_outcome().unwrap().is_configured());
    assert_eq!(count_events(xpt.notifier(), is_identity_changed), 0);
    assert_eq!(count_events(xpt.notifier(), is_found), 0);
    assert_eq!(count_events(xpt.notifier(), is_lost), 0);
    assert_eq!(
        xpt.device(&path(0)).unwrap().identify.as_ref().unwrap().serial,
        "WD-REPLACED"
    );
}

#[test]
fn test_replacement_failing_setmode_leaves_old_device_lost() {
    let mut xpt = configured_engine();
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(0),
        SimDevice::Ata {
            identify: sample_ata_identify_with_serial("WD-OTHER"),
        },
    );
    let mut probe = xpt.start_address_probe(path(0), false);
    xpt::testing::run_until_idle(&mut xpt, 20, |request| match request.command {
        AtaCommand::SetTransferMode(_) => abort_completion(request.id),
        _ => answer(&bench, request),
    });

    assert_eq!(probe.try_outcome().unwrap().result, ProbeResult::Failed);
    assert_eq!(count_events(xpt.notifier(), is_lost), 1);
    assert_eq!(count_events(xpt.notifier(), is_identity_changed), 1);
    assert_eq!(count_events(xpt.notifier(), is_found), 0);
    assert!(xpt.device(&path(0)).unwrap().unconfigured);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_single_character_change_reports_once(
        field in 0usize..3,
        idx in 0usize..6,
        replacement in "[a-z]",
    ) {
        let model = "MODEL ABCDEF";
        let revision = "REV123";
        let serial = "SER456";
        let mutate = |text: &str| {
            let mut bytes = text.as_bytes().to_vec();
            bytes[idx] = replacement.as_bytes()[0];
            String::from_utf8(bytes).unwrap()
        };
        let (m2, r2, s2) = match field {
            0 => (mutate(model), revision.to_string(), serial.to_string()),
            1 => (model.to_string(), mutate(revision), serial.to_string()),
            _ => (model.to_string(), revision.to_string(), mutate(serial)),
        };

        let block = |m: &str, r: &str, s: &str| {
            IdentifyBlock::ata(m).revision(r).serial(s).udma(5).pio(4).sata(2).build()
        };
        let mut first = Bench::new();
        first.insert(TargetAddress::Ordinary(0), SimDevice::Ata { identify: block(model, revision, serial) });
        let mut second = Bench::new();
        second.insert(TargetAddress::Ordinary(0), SimDevice::Ata { identify: block(&m2, &r2, &s2) });

        let mut xpt = engine(capability(1, false));
        let _a = xpt.start_address_probe(path(0), false);
        settle(&mut xpt, &first);
        let _b = xpt.start_address_probe(path(0), false);
        settle(&mut xpt, &second);

        prop_assert_eq!(count_events(xpt.notifier(), is_identity_changed), 1);
        prop_assert_eq!(count_events(xpt.notifier(), is_lost), 1);
    }
}

// ============================================================================
// Failure Handling
// ============================================================================

#[test]
fn test_frozen_failure_releases_queue_once() {
    let config = ProbeConfig {
        command_retries: 1,
        ..ProbeConfig::default()
    };
    let mut xpt = engine_with(capability(1, false), config);
    let mut probe = xpt.start_address_probe(path(0), false);

    xpt::testing::run_until_idle(&mut xpt, 10, |request| frozen_timeout(request.id));

    assert_eq!(probe.try_outcome().unwrap().result, ProbeResult::Failed);
    // One release per frozen completion: the first try and the retry
    assert_eq!(xpt.transport().releases(path(0)), 2);
    assert_eq!(xpt.transport().freezes(path(0)), 0);
}

#[test]
fn test_frozen_release_precedes_next_command() {
    let mut xpt = engine(capability(1, false));
    let _probe = xpt.start_address_probe(path(0), false);

    let reset = xpt.transport_mut().next_request().unwrap();
    xpt.complete(reset_completion(reset.id, SIG_ATA).frozen());

    let calls = &xpt.transport().calls;
    let release = calls
        .iter()
        .position(|c| matches!(c, TransportCall::Release { .. }))
        .unwrap();
    let identify = calls
        .iter()
        .position(|c| matches!(c, TransportCall::Submit(r) if r.command == AtaCommand::Identify))
        .unwrap();
    assert!(release < identify);
}

#[test]
fn test_transient_identify_error_is_retried() {
    let bench = ata_bench(0);
    let mut xpt = engine(capability(1, false));
    let mut probe = xpt.start_address_probe(path(0), false);

    let mut identify_failures = 2;
    xpt::testing::run_until_idle(&mut xpt, 20, |request| {
        if request.command == AtaCommand::Identify && identify_failures > 0 {
            identify_failures -= 1;
            Completion::with_status(request.id, CompletionStatus::Requeue)
        } else {
            answer(&bench, request)
        }
    });

    assert!(probe.try_outcome().unwrap().is_configured());
    let identifies = commands_for(&xpt, path(0))
        .into_iter()
        .filter(|c| *c == AtaCommand::Identify)
        .count();
    assert_eq!(identifies, 3);
}

#[test]
fn test_retry_exhaustion_fails_probe() {
    let mut xpt = engine(capability(1, false));
    let mut probe = xpt.start_address_probe(path(0), false);

    xpt::testing::run_until_idle(&mut xpt, 20, |request| match request.command {
        AtaCommand::Reset => reset_completion(request.id, SIG_ATA),
        _ => Completion::with_status(request.id, CompletionStatus::Timeout),
    });

    assert_eq!(probe.try_outcome().unwrap().result, ProbeResult::Failed);
    // First attempt plus the default four retries
    assert_eq!(commands_for(&xpt, path(0)).len(), 1 + 5);
    assert!(xpt.device(&path(0)).unwrap().unconfigured);
}

#[test]
fn test_configured_device_gone_is_lost() {
    let mut xpt = configured_engine();
    let mut probe = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &Bench::new());

    assert_eq!(probe.try_outcome().unwrap().result, ProbeResult::Failed);
    let events = xpt.notifier();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], XptEvent::DeviceLost { .. }));

    let record = xpt.device(&path(0)).unwrap();
    assert!(record.unconfigured);
    assert!(!record.identify_valid());

    // The hold taken for the re-probe is dropped again
    assert_eq!(xpt.transport().freezes(path(0)), 1);
    assert_eq!(xpt.transport().releases(path(0)), 1);
}

#[test]
fn test_refused_submits_end_the_probe() {
    let mut xpt = engine(capability(1, false));
    xpt.transport_mut().refuse_submits = true;
    let mut probe = xpt.start_address_probe(path(0), false);

    assert_eq!(probe.try_outcome().unwrap().result, ProbeResult::Failed);
    // First attempt plus the default four retries, each refused
    assert_eq!(xpt.transport().refused, 1 + 4);
    assert_eq!(xpt.inflight(), 0);
    assert!(xpt.is_idle());
}

#[test]
fn test_probe_succeeds_once_transport_accepts_again() {
    let bench = ata_bench(0);
    let mut xpt = engine(capability(1, false));
    xpt.transport_mut().refuse_submits = true;
    let mut probe = xpt.start_address_probe(path(0), false);
    assert!(probe.try_outcome().is_some());

    // Once the transport accepts again, a new probe gets through
    xpt.transport_mut().refuse_submits = false;
    let mut again = xpt.start_address_probe(path(0), false);
    settle(&mut xpt, &bench);
    assert!(again.try_outcome().unwrap().is_configured());
}

#[test]
fn test_legacy_device_setmode_rejection() {
    let mut bench = Bench::new();
    bench.insert(
        TargetAddress::Ordinary(0),
        SimDevice::Ata {
            identify: sample_legacy_identify(),
        },
    );
    let mut xpt = engine(capability(1, false));
    let mut probe = xpt.start_address_probe(path(0), false);
    xpt::testing::run_until_idle(&mut xpt, 20, |request| match request.command {
        AtaCommand::SetTransferMode(_) => abort_completion(request.id),
        _ => answer(&bench, request),
    });

    assert!(probe.try_outcome().unwrap().is_configured());
    assert_eq!(xpt.device(&path(0)).unwrap().mode, Some(TransferMode::PIO2));
}

#[test]
fn test_modern_device_setmode_rejection() {
    let bench = ata_bench(0);
    let mut xpt = engine(capability(1, false));
    let mut probe = xpt.start_address_probe(path(0), false);
    xpt::testing::run_until_idle(&mut xpt, 20, |request| match request.command {
        AtaCommand::SetTransferMode(_) => abort_completion(request.id),
        _ => answer(&bench, request),
    });

    assert_eq!(probe.try_outcome().unwrap().result, ProbeResult::Failed);
    assert_eq!(count_events(xpt.notifier(), is_found), 0);
}

// ============================================================================
// Request FIFO
// ============================================================================

#[test]
fn test_busy_address_queues_and_reruns() {
    let bench = ata_bench(0);
    let mut xpt = engine(capability(1, false));
    let mut first = xpt.start_address_probe(path(0), false);
    let mut second = xpt.start_address_probe(path(0), false);

    // Only one probe context and one command in flight
    assert_eq!(xpt.transport().outstanding().len(), 1);
    assert_eq!(xpt.prober(&path(0)).unwrap().pending_len(), 2);

    settle(&mut xpt, &bench);

    assert!(first.try_outcome().unwrap().is_configured());
    assert!(second.try_outcome().unwrap().is_configured());
    assert_eq!(
        commands_for(&xpt, path(0)),
        vec![
            AtaCommand::Reset,
            AtaCommand::Identify,
            AtaCommand::SetTransferMode(TransferMode::UDMA6),
            AtaCommand::Identify,
            AtaCommand::SetTransferMode(TransferMode::UDMA6),
        ]
    );
    assert!(xpt.is_idle());
}
