//! Device registry
//!
//! One [`DeviceRecord`] per probed address. Records are created
//! unconfigured, filled in by the prober and kept across re-probes so the
//! identity seen last time is still around when the device is probed again.

use crate::quirks::{Quirk, default_quirk};
use protocol::{
    DevicePath, IdentifyData, IdentityDigest, InquiryData, Protocol, TransferMode, TransportKind,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// What the core knows about one address
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub path: DevicePath,
    pub protocol: Protocol,
    pub protocol_version: u8,
    pub transport: Option<TransportKind>,
    pub transport_version: u8,
    /// IDENTIFY data, present only while valid
    pub identify: Option<IdentifyData>,
    /// INQUIRY data of packet devices
    pub inquiry: Option<InquiryData>,
    /// Negotiated transfer mode
    pub mode: Option<TransferMode>,
    pub unconfigured: bool,
    #[serde(skip)]
    pub quirk: &'static Quirk,
}

impl DeviceRecord {
    pub fn new(path: DevicePath) -> Self {
        Self {
            path,
            protocol: Protocol::Unknown,
            protocol_version: 0,
            transport: None,
            transport_version: 0,
            identify: None,
            inquiry: None,
            mode: None,
            unconfigured: true,
            quirk: default_quirk(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    pub fn identify_valid(&self) -> bool {
        self.identify.is_some()
    }

    pub fn inquiry_valid(&self) -> bool {
        self.inquiry.is_some()
    }

    /// Digest of the cached identity, if any
    pub fn digest(&self) -> Option<IdentityDigest> {
        self.identify.as_ref().map(IdentifyData::digest)
    }

    /// Model string for log lines
    pub fn model(&self) -> &str {
        self.identify
            .as_ref()
            .map(|ident| ident.model.as_str())
            .unwrap_or("<unknown>")
    }

    /// Drop cached identification; the protocol stays so a re-probe knows
    /// which identify command to send
    pub fn mark_unconfigured(&mut self) {
        self.unconfigured = true;
        self.identify = None;
        self.inquiry = None;
        self.mode = None;
        self.quirk = default_quirk();
    }

    /// Returns true if the record was unconfigured before
    pub fn mark_configured(&mut self) -> bool {
        std::mem::replace(&mut self.unconfigured, false)
    }
}

/// Records keyed by address
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: BTreeMap<DevicePath, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, path: DevicePath) -> &mut DeviceRecord {
        self.records
            .entry(path)
            .or_insert_with(|| DeviceRecord::new(path))
    }

    pub fn get(&self, path: &DevicePath) -> Option<&DeviceRecord> {
        self.records.get(path)
    }

    pub fn get_mut(&mut self, path: &DevicePath) -> Option<&mut DeviceRecord> {
        self.records.get_mut(path)
    }

    /// Returns true if the record existed and was unconfigured before
    pub fn mark_configured(&mut self, path: &DevicePath) -> bool {
        self.records
            .get_mut(path)
            .map(DeviceRecord::mark_configured)
            .unwrap_or(false)
    }

    pub fn mark_unconfigured(&mut self, path: &DevicePath) {
        if let Some(record) = self.records.get_mut(path) {
            record.mark_unconfigured();
        }
    }

    pub fn remove(&mut self, path: &DevicePath) -> Option<DeviceRecord> {
        self.records.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    /// Records with a completed probe
    pub fn configured(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values().filter(|r| r.is_configured())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
