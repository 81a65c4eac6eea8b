//! Static device quirk table
//!
//! Entries are matched in order against the normalized model and firmware
//! revision; the last entry matches everything and is the default assigned
//! to a record before its identity is known.

use protocol::TransferMode;

/// Behavior adjustments attached to a quirk entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuirkFlags(u32);

impl QuirkFlags {
    pub const NONE: Self = Self(0);
    /// Never fetch INQUIRY data beyond the first 36 bytes
    pub const SHORT_INQUIRY_ONLY: Self = Self(1 << 0);
    /// Do not set a DMA mode even when one is advertised
    pub const PIO_ONLY: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Quirk {
    /// Model pattern, `*` and `?` wildcards
    pub model: &'static str,
    /// Firmware revision pattern
    pub revision: &'static str,
    /// Upper bound for mode negotiation
    pub max_mode: TransferMode,
    pub flags: QuirkFlags,
}

impl Quirk {
    /// Mode ceiling after applying the flags
    pub fn mode_limit(&self) -> TransferMode {
        if self.flags.contains(QuirkFlags::PIO_ONLY) {
            self.max_mode.min(TransferMode::PIO4)
        } else {
            self.max_mode
        }
    }

    pub fn is_default(&self) -> bool {
        std::ptr::eq(self, default_quirk())
    }
}

static QUIRK_TABLE: &[Quirk] = &[
    Quirk {
        // Hangs on allocation lengths above 36
        model: "TOSHIBA CD-ROM XM-6*",
        revision: "*",
        max_mode: TransferMode::WDMA2,
        flags: QuirkFlags::SHORT_INQUIRY_ONLY,
    },
    Quirk {
        model: "Pioneer DVD-ROM ATAPIModel DVD-1?4*",
        revision: "*",
        max_mode: TransferMode::UDMA2,
        flags: QuirkFlags::SHORT_INQUIRY_ONLY,
    },
    Quirk {
        // DMA corrupts data with early firmware
        model: "ST3*A",
        revision: "3.0?",
        max_mode: TransferMode::UDMA2,
        flags: QuirkFlags::NONE,
    },
    Quirk {
        model: "SanDisk SDCFB-*",
        revision: "*",
        max_mode: TransferMode::PIO4,
        flags: QuirkFlags::PIO_ONLY,
    },
    Quirk {
        model: "*",
        revision: "*",
        max_mode: TransferMode::UDMA6,
        flags: QuirkFlags::NONE,
    },
];

/// Entry for a device whose identity is not yet known
pub fn default_quirk() -> &'static Quirk {
    &QUIRK_TABLE[QUIRK_TABLE.len() - 1]
}

/// First entry matching `model` and `revision`
pub fn find_quirk(model: &str, revision: &str) -> &'static Quirk {
    QUIRK_TABLE
        .iter()
        .find(|q| wildcard_match(q.model, model) && wildcard_match(q.revision, revision))
        .unwrap_or_else(default_quirk)
}

/// Shell-style match: `*` any run, `?` any single character
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            // Let the last star swallow one more character
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
