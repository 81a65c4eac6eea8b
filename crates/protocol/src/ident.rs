//! IDENTIFY (PACKET) DEVICE data
//!
//! The response is 256 little-endian words. Text fields are stored with the
//! two bytes of every word swapped, padded with spaces; [`IdentifyData::parse`]
//! returns them normalized (host order, trimmed, packed). Only the capability
//! words the discovery core inspects are kept.

use crate::command::IDENTIFY_DATA_LENGTH;
use crate::error::{ProtocolError, Result};
use crate::integrity::IdentityDigest;
use crate::types::{TransferMode, TransportKind};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

// Word offsets
const WORD_CONFIG: usize = 0;
const WORD_SERIAL: std::ops::Range<usize> = 10..20;
const WORD_REVISION: std::ops::Range<usize> = 23..27;
const WORD_MODEL: std::ops::Range<usize> = 27..47;
const WORD_CAPABILITIES1: usize = 49;
const WORD_RETIRED_PIOMODE: usize = 51;
const WORD_VALID: usize = 53;
const WORD_MWDMA_MODES: usize = 63;
const WORD_PIO_MODES: usize = 64;
const WORD_SATA_CAPABILITIES: usize = 76;
const WORD_VERSION_MAJOR: usize = 80;
const WORD_UDMA_MODES: usize = 88;

/// Words 64-70 are valid
const VALID_64_70: u16 = 0x0002;
/// Word 88 is valid
const VALID_88: u16 = 0x0004;
/// IORDY flow control supported (word 49)
const SUPPORT_IORDY: u16 = 0x0800;
const RETIRED_PIO_MASK: u16 = 0x0300;

const SATA_GEN1: u16 = 0x0002;
const SATA_GEN2: u16 = 0x0004;
const SATA_GEN3: u16 = 0x0008;

/// Model prefixes of vendors whose firmware already stores text in host order
const HOST_ORDER_MODEL_PREFIXES: [&[u8]; 3] = [b"NE", b"FX", b"Pi"];

/// Decoded IDENTIFY data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyData {
    pub config: u16,
    pub serial: String,
    pub revision: String,
    pub model: String,
    pub capabilities1: u16,
    pub retired_piomode: u16,
    pub valid_fields: u16,
    pub mwdma_modes: u16,
    pub pio_modes: u16,
    pub sata_capabilities: u16,
    pub version_major: u16,
    pub udma_modes: u16,
}

impl IdentifyData {
    /// Decode and normalize a raw 512-byte IDENTIFY response
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < IDENTIFY_DATA_LENGTH {
            return Err(ProtocolError::ShortData {
                what: "IDENTIFY",
                needed: IDENTIFY_DATA_LENGTH,
                available: raw.len(),
            });
        }

        let raw_model = text_words(raw, WORD_MODEL);
        let swap = needs_byte_swap(raw_model);

        Ok(Self {
            config: word_at(raw, WORD_CONFIG),
            serial: normalize_text(text_words(raw, WORD_SERIAL), swap),
            revision: normalize_text(text_words(raw, WORD_REVISION), swap),
            model: normalize_text(raw_model, swap),
            capabilities1: word_at(raw, WORD_CAPABILITIES1),
            retired_piomode: word_at(raw, WORD_RETIRED_PIOMODE),
            valid_fields: word_at(raw, WORD_VALID),
            mwdma_modes: word_at(raw, WORD_MWDMA_MODES),
            pio_modes: word_at(raw, WORD_PIO_MODES),
            sata_capabilities: word_at(raw, WORD_SATA_CAPABILITIES),
            version_major: word_at(raw, WORD_VERSION_MAJOR),
            udma_modes: word_at(raw, WORD_UDMA_MODES),
        })
    }

    /// Identity block of a port multiplier, built from its GSCR registers
    pub fn port_multiplier(product_id: u32, revision: u32) -> Self {
        Self {
            model: format!("Port Multiplier {:08x}", product_id),
            revision: format!("{:04x}", revision),
            ..Self::default()
        }
    }

    /// Digest over model, revision and serial
    pub fn digest(&self) -> IdentityDigest {
        IdentityDigest::of(&self.model, &self.revision, &self.serial)
    }

    pub fn supports_iordy(&self) -> bool {
        self.capabilities1 & SUPPORT_IORDY != 0
    }

    /// Fastest PIO mode the device advertises
    pub fn max_pio_mode(&self) -> TransferMode {
        if self.valid_fields & VALID_64_70 != 0 {
            if self.pio_modes & 0x02 != 0 {
                return TransferMode::PIO4;
            }
            if self.pio_modes & 0x01 != 0 {
                return TransferMode::PIO3;
            }
        }
        if self.mwdma_modes & 0x04 != 0 {
            return TransferMode::PIO4;
        }
        if self.mwdma_modes & 0x02 != 0 {
            return TransferMode::PIO3;
        }
        if self.mwdma_modes & 0x01 != 0 {
            return TransferMode::PIO2;
        }
        match self.retired_piomode & RETIRED_PIO_MASK {
            0x0200 => TransferMode::PIO2,
            0x0100 => TransferMode::PIO1,
            _ => TransferMode::PIO0,
        }
    }

    /// Fastest multiword DMA mode, if any
    pub fn max_wdma_mode(&self) -> Option<TransferMode> {
        (0..=2u8)
            .rev()
            .find(|n| self.mwdma_modes & (1u16 << *n) != 0)
            .map(TransferMode::wdma)
    }

    /// Fastest Ultra DMA mode, if word 88 is valid and any is advertised
    pub fn max_udma_mode(&self) -> Option<TransferMode> {
        if self.valid_fields & VALID_88 == 0 {
            return None;
        }
        (0..=6u8)
            .rev()
            .find(|n| self.udma_modes & (1u16 << *n) != 0)
            .map(TransferMode::udma)
    }

    /// Fastest mode supported by both the device and `limit`
    pub fn max_mode(&self, limit: TransferMode) -> TransferMode {
        if limit >= TransferMode::UDMA0 {
            if let Some(udma) = self.max_udma_mode() {
                return udma.min(limit);
            }
        }
        if limit >= TransferMode::WDMA0 {
            if let Some(wdma) = self.max_wdma_mode() {
                return wdma.min(limit);
            }
        }
        self.max_pio_mode().min(limit)
    }

    /// Highest ATA/ATAPI major version claimed in word 80
    pub fn ata_version(&self) -> u8 {
        match self.version_major {
            0 | 0xffff => 0,
            v => (15 - v.leading_zeros()) as u8,
        }
    }

    /// Transport kind and version implied by the capability words
    pub fn transport(&self) -> (TransportKind, u8) {
        match self.sata_capabilities {
            0x0000 | 0xffff => (TransportKind::Ata, self.ata_version()),
            caps => {
                let generation = if caps & SATA_GEN3 != 0 {
                    3
                } else if caps & SATA_GEN2 != 0 {
                    2
                } else if caps & SATA_GEN1 != 0 {
                    1
                } else {
                    0
                };
                (TransportKind::Sata, generation)
            }
        }
    }
}

fn word_at(raw: &[u8], index: usize) -> u16 {
    LittleEndian::read_u16(&raw[index * 2..index * 2 + 2])
}

fn text_words(raw: &[u8], words: std::ops::Range<usize>) -> &[u8] {
    &raw[words.start * 2..words.end * 2]
}

fn needs_byte_swap(raw_model: &[u8]) -> bool {
    !HOST_ORDER_MODEL_PREFIXES
        .iter()
        .any(|prefix| raw_model.starts_with(prefix))
}

/// Byte-swap (optionally), trim and pack an IDENTIFY text field
///
/// NUL and `_` become spaces, trailing spaces are dropped, leading spaces
/// are removed and interior runs of spaces collapse to one.
pub fn normalize_text(raw: &[u8], swap: bool) -> String {
    let mut buf = raw.to_vec();
    if swap {
        for pair in buf.chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
    }

    for b in buf.iter_mut() {
        if *b == 0 || *b == b'_' {
            *b = b' ';
        }
    }
    while buf.last() == Some(&b' ') {
        buf.pop();
    }

    let mut packed = Vec::with_capacity(buf.len());
    let mut blank = false;
    for (i, &b) in buf.iter().enumerate() {
        if b == b' ' {
            if !blank && i != 0 {
                packed.push(b' ');
            }
            blank = true;
        } else {
            packed.push(b);
            blank = false;
        }
    }

    String::from_utf8_lossy(&packed).into_owned()
}
