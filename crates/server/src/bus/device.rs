//! Simulated device
//!
//! Answers probe commands the way an ATA disk, an ATAPI drive or a port
//! multiplier would, from the blocks built out of its [`DeviceSettings`].

use crate::config::{DeviceKind, DeviceSettings};
use bytes::Bytes;
use common::{IdentifyBlock, InquiryBlock};
use protocol::{
    AtaCommand, Completion, CompletionStatus, PM_GSCR_PRODUCT_ID, PM_GSCR_REVISION, Request,
    SIG_ATA, SIG_ATAPI, SIG_PORT_MULTIPLIER, TaskFile, TransferMode,
};
use tracing::debug;

/// Device error registers for an aborted command
const ABORTED: CompletionStatus = CompletionStatus::DeviceError {
    status: 0x51,
    error: 0x04,
};

pub struct SimDevice {
    settings: DeviceSettings,
    identify: Bytes,
    /// Identity reported once `swap_identity_after` IDENTIFYs were answered
    replacement: Bytes,
    inquiry: Bytes,
    identifies: u32,
    timeouts_left: u32,
    mode: Option<TransferMode>,
}

impl SimDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        let identify = identify_block(&settings, &settings.serial);
        let replacement = identify_block(&settings, &format!("{}-R", settings.serial));
        let inquiry = inquiry_block(&settings);
        Self {
            timeouts_left: settings.transient_failures,
            settings,
            identify,
            replacement,
            inquiry,
            identifies: 0,
            mode: None,
        }
    }

    /// Signature this device leaves in the task file after a reset
    pub fn signature(&self) -> u16 {
        match self.settings.kind {
            DeviceKind::Ata => SIG_ATA,
            DeviceKind::Atapi => SIG_ATAPI,
            DeviceKind::PortMultiplier => SIG_PORT_MULTIPLIER,
        }
    }

    /// Mode accepted by the last SET TRANSFER MODE
    #[cfg(test)]
    pub fn mode(&self) -> Option<TransferMode> {
        self.mode
    }

    pub fn answer(&mut self, request: &Request) -> Completion {
        let id = request.id;
        if self.timeouts_left > 0 {
            self.timeouts_left -= 1;
            debug!(
                "{}: {:?} timing out ({} more)",
                request.path, request.command, self.timeouts_left
            );
            return Completion::with_status(id, CompletionStatus::Timeout);
        }

        match (request.command, self.settings.kind) {
            (AtaCommand::Reset, _) => {
                Completion::ok(id).registers(TaskFile::with_signature(self.signature()))
            }
            (AtaCommand::Identify, DeviceKind::Ata)
            | (AtaCommand::AtapiIdentify, DeviceKind::Atapi) => {
                self.identifies += 1;
                let swapped = self
                    .settings
                    .swap_identity_after
                    .is_some_and(|after| self.identifies > after);
                let block = if swapped {
                    &self.replacement
                } else {
                    &self.identify
                };
                Completion::ok(id).data(block.clone())
            }
            (AtaCommand::SetTransferMode(mode), DeviceKind::Ata | DeviceKind::Atapi) => {
                if self.settings.reject_setmode {
                    return Completion::with_status(id, ABORTED);
                }
                debug!("{}: mode {} (was {:?})", request.path, mode, self.mode);
                self.mode = Some(mode);
                Completion::ok(id)
            }
            (AtaCommand::Inquiry { length }, DeviceKind::Atapi) => {
                let len = (length as usize).min(self.inquiry.len());
                Completion::ok(id).data(self.inquiry.slice(..len))
            }
            (AtaCommand::PmRead { register, .. }, DeviceKind::PortMultiplier) => {
                let value = match register {
                    PM_GSCR_PRODUCT_ID => self.settings.product_id,
                    PM_GSCR_REVISION => self.settings.pm_revision,
                    _ => return Completion::with_status(id, ABORTED),
                };
                Completion::ok(id).registers(TaskFile::with_register_value(value))
            }
            _ => Completion::with_status(id, ABORTED),
        }
    }
}

fn identify_block(settings: &DeviceSettings, serial: &str) -> Bytes {
    let mut block = match settings.kind {
        DeviceKind::Atapi => IdentifyBlock::atapi(&settings.model),
        _ => IdentifyBlock::ata(&settings.model),
    }
    .serial(serial)
    .revision(&settings.revision)
    .pio(settings.pio)
    .iordy(settings.iordy)
    .sata(settings.sata)
    .ata_version(settings.ata_version);
    if let Some(udma) = settings.udma {
        block = block.udma(udma);
    }
    block.build()
}

/// Vendor is the first word of the model, product the rest
fn inquiry_block(settings: &DeviceSettings) -> Bytes {
    let (vendor, product) = settings
        .model
        .split_once(' ')
        .unwrap_or(("", settings.model.as_str()));
    InquiryBlock::cdrom(vendor, product, &settings.revision)
        .extra(settings.inquiry_extra)
        .build()
}
