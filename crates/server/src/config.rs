//! Host configuration management

use anyhow::{Context, Result, anyhow};
use protocol::{BusId, MAX_ORDINARY_TARGETS, PORT_MULTIPLIER_TARGET, PathCapability, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use xpt::ProbeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    /// Probe state machine tunables
    #[serde(default)]
    pub probe: ProbeConfig,
    /// The simulated bus and what sits on it
    #[serde(default)]
    pub bus: BusSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default)]
    pub bus_id: u32,
    /// Number of ordinary targets (0..max_target)
    #[serde(default = "BusSettings::default_max_target")]
    pub max_target: u8,
    /// Controller can address a port multiplier at target 15
    #[serde(default)]
    pub port_multiplier: bool,
    /// Probability (0.0-1.0) that a command times out with the queue frozen
    #[serde(default)]
    pub fault_rate: f64,
    /// Seed for fault injection; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
}

impl BusSettings {
    fn default_max_target() -> u8 {
        2
    }

    pub fn id(&self) -> BusId {
        BusId(self.bus_id)
    }

    /// What the bus reports to the discovery core
    pub fn capability(&self) -> PathCapability {
        PathCapability {
            max_target: self.max_target,
            port_multiplier: self.port_multiplier,
            transport: TransportKind::Sata,
            initiator: true,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            bus_id: 0,
            max_target: Self::default_max_target(),
            port_multiplier: false,
            fault_rate: 0.0,
            seed: None,
            devices: vec![
                DeviceSettings {
                    target: 0,
                    kind: DeviceKind::Ata,
                    model: "WDC WD10EZEX-08WN4A0".to_string(),
                    serial: "WD-WCC3F1234567".to_string(),
                    revision: "01.01A01".to_string(),
                    udma: Some(6),
                    ..DeviceSettings::default()
                },
                DeviceSettings {
                    target: 1,
                    kind: DeviceKind::Atapi,
                    model: "HL-DT-ST DVDRAM GH24NSD1".to_string(),
                    serial: "K1234567890".to_string(),
                    revision: "LG00".to_string(),
                    udma: Some(5),
                    inquiry_extra: 60,
                    ..DeviceSettings::default()
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Ata,
    Atapi,
    PortMultiplier,
}

/// One simulated device
///
/// # Example Configuration
/// ```toml
/// [[bus.devices]]
/// target = 0
/// kind = "ata"
/// model = "ST3500418AS"
/// udma = 6
/// transient_failures = 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Raw target id; 15 is the port multiplier slot
    pub target: u8,
    #[serde(default)]
    pub kind: DeviceKind,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub revision: String,
    /// Fastest Ultra DMA mode, none for PIO-only hardware
    #[serde(default)]
    pub udma: Option<u8>,
    #[serde(default = "DeviceSettings::default_pio")]
    pub pio: u8,
    #[serde(default = "DeviceSettings::default_iordy")]
    pub iordy: bool,
    /// Serial ATA generation, 0 for a parallel device
    #[serde(default = "DeviceSettings::default_sata")]
    pub sata: u8,
    #[serde(default = "DeviceSettings::default_ata_version")]
    pub ata_version: u8,
    /// Abort SET TRANSFER MODE
    #[serde(default)]
    pub reject_setmode: bool,
    /// Commands that time out before the device answers
    #[serde(default)]
    pub transient_failures: u32,
    /// Report a different serial number after this many IDENTIFYs
    #[serde(default)]
    pub swap_identity_after: Option<u32>,
    /// INQUIRY bytes beyond the standard 36 (ATAPI)
    #[serde(default)]
    pub inquiry_extra: usize,
    /// GSCR[0] (port multiplier)
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: u32,
    /// GSCR[1] (port multiplier)
    #[serde(default = "DeviceSettings::default_pm_revision")]
    pub pm_revision: u32,
}

impl DeviceSettings {
    fn default_pio() -> u8 {
        4
    }

    fn default_iordy() -> bool {
        true
    }

    fn default_sata() -> u8 {
        3
    }

    fn default_ata_version() -> u8 {
        8
    }

    fn default_product_id() -> u32 {
        0x3726_1095
    }

    fn default_pm_revision() -> u32 {
        0x000e
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            target: 0,
            kind: DeviceKind::default(),
            model: String::new(),
            serial: String::new(),
            revision: String::new(),
            udma: None,
            pio: Self::default_pio(),
            iordy: Self::default_iordy(),
            sata: Self::default_sata(),
            ata_version: Self::default_ata_version(),
            reject_setmode: false,
            transient_failures: 0,
            swap_identity_after: None,
            inquiry_extra: 0,
            product_id: Self::default_product_id(),
            pm_revision: Self::default_pm_revision(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                log_level: "info".to_string(),
            },
            probe: ProbeConfig::default(),
            bus: BusSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/ata-probe/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ata-probe").join("config.toml")
        } else {
            PathBuf::from(".config/ata-probe/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        common::validate_filter(&self.server.log_level)
            .context("Invalid [server] log_level")?;

        self.probe.validate().context("Invalid [probe] section")?;
        self.validate_bus()
    }

    fn validate_bus(&self) -> Result<()> {
        let bus = &self.bus;
        if bus.max_target > MAX_ORDINARY_TARGETS {
            return Err(anyhow!(
                "max_target {} exceeds {} ordinary targets",
                bus.max_target,
                MAX_ORDINARY_TARGETS
            ));
        }
        if !(0.0..=1.0).contains(&bus.fault_rate) {
            return Err(anyhow!(
                "fault_rate {} must be between 0.0 and 1.0",
                bus.fault_rate
            ));
        }

        let mut seen = HashSet::new();
        for device in &bus.devices {
            if !seen.insert(device.target) {
                return Err(anyhow!("Duplicate device at target {}", device.target));
            }
            Self::validate_device(bus, device)?;
        }
        Ok(())
    }

    fn validate_device(bus: &BusSettings, device: &DeviceSettings) -> Result<()> {
        match device.kind {
            DeviceKind::PortMultiplier => {
                if device.target != PORT_MULTIPLIER_TARGET {
                    return Err(anyhow!(
                        "Port multiplier must sit at target {}, not {}",
                        PORT_MULTIPLIER_TARGET,
                        device.target
                    ));
                }
                if !bus.port_multiplier {
                    return Err(anyhow!(
                        "Port multiplier configured on a bus without port_multiplier = true"
                    ));
                }
            }
            DeviceKind::Ata | DeviceKind::Atapi => {
                if device.target >= bus.max_target {
                    return Err(anyhow!(
                        "Device target {} outside 0..{}",
                        device.target,
                        bus.max_target
                    ));
                }
                if device.model.trim().is_empty() {
                    return Err(anyhow!("Device at target {} has no model", device.target));
                }
            }
        }
        if device.udma.is_some_and(|m| m > 6) {
            return Err(anyhow!(
                "Device at target {}: udma must be 0-6",
                device.target
            ));
        }
        if device.pio > 4 {
            return Err(anyhow!("Device at target {}: pio must be 0-4", device.target));
        }
        Ok(())
    }
}
