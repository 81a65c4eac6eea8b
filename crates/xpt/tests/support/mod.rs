//! Scripted devices answering engine requests in tests

#![allow(dead_code)]

use bytes::Bytes;
use common::test_utils::{
    abort_completion, data_completion, register_completion, reset_completion,
};
use protocol::{
    AtaCommand, BusId, Completion, CompletionStatus, DevicePath, PathCapability, Request,
    SIG_ATA, SIG_ATAPI, SIG_PORT_MULTIPLIER, TargetAddress, TransportKind,
};
use std::collections::HashMap;
use xpt::testing::MockTransport;
use xpt::{ProbeConfig, Xpt, XptEvent};

pub const BUS: BusId = BusId(0);

/// What sits at a target
#[derive(Debug, Clone)]
pub enum SimDevice {
    Ata { identify: Bytes },
    Atapi { identify: Bytes, inquiry: Bytes },
    PortMultiplier { product_id: u32, revision: u32 },
}

pub type Bench = HashMap<TargetAddress, SimDevice>;

pub fn path(target: u8) -> DevicePath {
    DevicePath::new(BUS, TargetAddress::from_raw(target).unwrap())
}

pub fn pm_path() -> DevicePath {
    DevicePath::new(BUS, TargetAddress::PortMultiplierReserved)
}

pub fn capability(max_target: u8, port_multiplier: bool) -> PathCapability {
    PathCapability {
        max_target,
        port_multiplier,
        transport: TransportKind::Sata,
        initiator: true,
    }
}

pub fn engine(cap: PathCapability) -> Xpt<MockTransport, Vec<XptEvent>> {
    engine_with(cap, ProbeConfig::default())
}

pub fn engine_with(cap: PathCapability, config: ProbeConfig) -> Xpt<MockTransport, Vec<XptEvent>> {
    Xpt::new(MockTransport::new().with_bus(BUS, cap), Vec::new(), config).unwrap()
}

/// Answer `request` the way the devices in `bench` would
///
/// An empty port-multiplier slot reports the signature of the device
/// behind it, as a bare SATA port does.
pub fn answer(bench: &Bench, request: &Request) -> Completion {
    let id = request.id;
    let device = bench.get(&request.path.target);

    match (request.command, device) {
        (AtaCommand::Reset, Some(SimDevice::Ata { .. })) => reset_completion(id, SIG_ATA),
        (AtaCommand::Reset, Some(SimDevice::Atapi { .. })) => reset_completion(id, SIG_ATAPI),
        (AtaCommand::Reset, Some(SimDevice::PortMultiplier { .. })) => {
            reset_completion(id, SIG_PORT_MULTIPLIER)
        }
        (AtaCommand::Reset, None) if request.path.target.is_port_multiplier() => {
            reset_completion(id, SIG_ATA)
        }
        (_, None) => Completion::with_status(id, CompletionStatus::NoDevice),

        (AtaCommand::Identify, Some(SimDevice::Ata { identify })) => {
            data_completion(id, identify.clone())
        }
        (AtaCommand::AtapiIdentify, Some(SimDevice::Atapi { identify, .. })) => {
            data_completion(id, identify.clone())
        }
        (AtaCommand::SetTransferMode(_), Some(SimDevice::Ata { .. } | SimDevice::Atapi { .. })) => {
            Completion::ok(id)
        }
        (AtaCommand::Inquiry { length }, Some(SimDevice::Atapi { inquiry, .. })) => {
            let len = (length as usize).min(inquiry.len());
            data_completion(id, inquiry.slice(..len))
        }
        (
            AtaCommand::PmRead { register, .. },
            Some(SimDevice::PortMultiplier {
                product_id,
                revision,
            }),
        ) => match register {
            0 => register_completion(id, *product_id),
            1 => register_completion(id, *revision),
            _ => abort_completion(id),
        },
        _ => abort_completion(id),
    }
}

/// Run until nothing is outstanding, answering from `bench`
pub fn settle(xpt: &mut Xpt<MockTransport, Vec<XptEvent>>, bench: &Bench) -> usize {
    xpt::testing::run_until_idle(xpt, 1000, |request| answer(bench, request))
}

/// Commands submitted for `path`, in order
pub fn commands_for(xpt: &Xpt<MockTransport, Vec<XptEvent>>, path: DevicePath) -> Vec<AtaCommand> {
    xpt.transport()
        .submitted()
        .filter(|r| r.path == path)
        .map(|r| r.command)
        .collect()
}

pub fn count_events(events: &[XptEvent], pred: impl Fn(&XptEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}
