//! Probe configuration

use crate::error::{Result, XptError};
use protocol::{IdentifyData, TransferMode};
use serde::{Deserialize, Serialize};

/// Tunables of the probe state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Re-submissions allowed per state for transient errors
    #[serde(default = "default_command_retries")]
    pub command_retries: u32,

    /// Fastest transfer mode the core will negotiate
    #[serde(default = "default_max_mode")]
    pub max_mode: TransferMode,

    /// Which devices may reject SET TRANSFER MODE without failing the probe
    #[serde(default)]
    pub legacy_mode: LegacyModePolicy,
}

fn default_command_retries() -> u32 {
    4
}

fn default_max_mode() -> TransferMode {
    TransferMode::UDMA6
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command_retries: default_command_retries(),
            max_mode: default_max_mode(),
            legacy_mode: LegacyModePolicy::default(),
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_retries > 32 {
            return Err(XptError::Config(format!(
                "command_retries {} is above the limit of 32",
                self.command_retries
            )));
        }
        if !self.legacy_mode.ceiling.is_pio() {
            return Err(XptError::Config(format!(
                "legacy_mode.ceiling must be a PIO mode, got {}",
                self.legacy_mode.ceiling
            )));
        }
        Ok(())
    }
}

/// Predicate for hardware that predates SET TRANSFER MODE
///
/// A device qualifies when its fastest mode is at or below `ceiling` and,
/// if `require_no_iordy` is set, it does not advertise IORDY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyModePolicy {
    #[serde(default = "default_legacy_ceiling")]
    pub ceiling: TransferMode,

    #[serde(default = "default_require_no_iordy")]
    pub require_no_iordy: bool,
}

fn default_legacy_ceiling() -> TransferMode {
    TransferMode::PIO2
}

fn default_require_no_iordy() -> bool {
    true
}

impl Default for LegacyModePolicy {
    fn default() -> Self {
        Self {
            ceiling: default_legacy_ceiling(),
            require_no_iordy: default_require_no_iordy(),
        }
    }
}

impl LegacyModePolicy {
    /// Whether a failed mode change on this device counts as success
    pub fn exempts(&self, ident: &IdentifyData) -> bool {
        let fastest = ident.max_mode(TransferMode::UDMA6);
        if fastest > self.ceiling {
            return false;
        }
        !(self.require_no_iordy && ident.supports_iordy())
    }
}
