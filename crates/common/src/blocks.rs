//! Builders for raw device data blocks
//!
//! The simulated bus answers IDENTIFY and INQUIRY with blocks laid out
//! exactly as a drive would return them, so the discovery core decodes the
//! same bytes it would see from hardware.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use protocol::IDENTIFY_DATA_LENGTH;

const WORDS: usize = IDENTIFY_DATA_LENGTH / 2;

/// Raw IDENTIFY (PACKET) DEVICE response under construction
#[derive(Debug, Clone)]
pub struct IdentifyBlock {
    words: [u16; WORDS],
    model: String,
    serial: String,
    revision: String,
    host_order: bool,
}

impl IdentifyBlock {
    /// Fixed-disk ATA device
    pub fn ata(model: &str) -> Self {
        Self::with_config(0x0040, model)
    }

    /// Removable ATAPI CD/DVD device
    pub fn atapi(model: &str) -> Self {
        Self::with_config(0x85c0, model)
    }

    fn with_config(config: u16, model: &str) -> Self {
        let mut words = [0u16; WORDS];
        words[0] = config;
        Self {
            words,
            model: model.to_string(),
            serial: String::new(),
            revision: String::new(),
            host_order: false,
        }
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_string();
        self
    }

    pub fn revision(mut self, revision: &str) -> Self {
        self.revision = revision.to_string();
        self
    }

    /// Advertise Ultra DMA modes 0 through `max`
    pub fn udma(mut self, max: u8) -> Self {
        self.words[53] |= 0x0004;
        self.words[88] = mode_bits(max.min(6));
        self
    }

    /// Advertise multiword DMA modes 0 through `max`
    pub fn wdma(mut self, max: u8) -> Self {
        self.words[63] = mode_bits(max.min(2));
        self
    }

    /// Advertise PIO modes 0 through `max`
    pub fn pio(mut self, max: u8) -> Self {
        let max = max.min(4);
        self.words[51] = (max.min(2) as u16) << 8;
        if max >= 3 {
            self.words[53] |= 0x0002;
            self.words[64] = if max == 4 { 0x0003 } else { 0x0001 };
        }
        self
    }

    /// IORDY flow control
    pub fn iordy(mut self, supported: bool) -> Self {
        if supported {
            self.words[49] |= 0x0800;
        } else {
            self.words[49] &= !0x0800;
        }
        self
    }

    /// Serial ATA capabilities up to `generation` (1-3)
    pub fn sata(mut self, generation: u8) -> Self {
        self.words[76] = match generation {
            0 => 0,
            1 => 0x0002,
            2 => 0x0006,
            _ => 0x000e,
        };
        self
    }

    /// ATA major versions up to `major`
    pub fn ata_version(mut self, major: u8) -> Self {
        let major = major.min(14);
        self.words[80] = mode_bits(major) & !0x0001;
        self
    }

    /// Store text fields unswapped, as some vendors' firmware does
    pub fn host_order(mut self, host_order: bool) -> Self {
        self.host_order = host_order;
        self
    }

    pub fn build(&self) -> Bytes {
        let mut raw = vec![0u8; IDENTIFY_DATA_LENGTH];
        for (i, word) in self.words.iter().enumerate() {
            LittleEndian::write_u16(&mut raw[i * 2..i * 2 + 2], *word);
        }
        self.put_text(&mut raw, 10..20, &self.serial);
        self.put_text(&mut raw, 23..27, &self.revision);
        self.put_text(&mut raw, 27..47, &self.model);
        Bytes::from(raw)
    }

    fn put_text(&self, raw: &mut [u8], words: std::ops::Range<usize>, text: &str) {
        let field = &mut raw[words.start * 2..words.end * 2];
        field.fill(b' ');
        let len = text.len().min(field.len());
        field[..len].copy_from_slice(&text.as_bytes()[..len]);
        if !self.host_order {
            for pair in field.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
    }
}

fn mode_bits(max: u8) -> u16 {
    ((1u32 << (max + 1)) - 1) as u16
}

/// Raw standard INQUIRY data
#[derive(Debug, Clone)]
pub struct InquiryBlock {
    device_type: u8,
    removable: bool,
    version: u8,
    qualifier: u8,
    vendor: String,
    product: String,
    revision: String,
    extra: usize,
}

impl InquiryBlock {
    /// CD/DVD device with no data beyond the standard 36 bytes
    pub fn cdrom(vendor: &str, product: &str, revision: &str) -> Self {
        Self {
            device_type: 0x05,
            removable: true,
            version: 0x05,
            qualifier: 0,
            vendor: vendor.to_string(),
            product: product.to_string(),
            revision: revision.to_string(),
            extra: 0,
        }
    }

    /// Vendor-specific bytes offered after the standard 36
    pub fn extra(mut self, bytes: usize) -> Self {
        self.extra = bytes;
        self
    }

    pub fn qualifier(mut self, qualifier: u8) -> Self {
        self.qualifier = qualifier;
        self
    }

    /// Full block; a device answers with the first `length` bytes of it
    pub fn build(&self) -> Bytes {
        let mut raw = vec![0u8; 36 + self.extra];
        raw[0] = (self.qualifier << 5) | (self.device_type & 0x1f);
        raw[1] = if self.removable { 0x80 } else { 0 };
        raw[2] = self.version;
        raw[4] = (raw.len() - 4).min(u8::MAX as usize) as u8;
        put_ascii(&mut raw[8..16], &self.vendor);
        put_ascii(&mut raw[16..32], &self.product);
        put_ascii(&mut raw[32..36], &self.revision);
        for (i, b) in raw[36..].iter_mut().enumerate() {
            *b = (i & 0xff) as u8;
        }
        Bytes::from(raw)
    }
}

fn put_ascii(field: &mut [u8], text: &str) {
    field.fill(b' ');
    let len = text.len().min(field.len());
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
}
