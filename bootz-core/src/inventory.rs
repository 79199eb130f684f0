//! Static chassis and control card inventory.
//!
//! The inventory is authored as TOML. Paths inside it (boot config files,
//! the artifact directory) are kept as written; resolving them against the
//! inventory file's location is the loader's job.

use crate::entity::{BootMode, EntityLookup};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur when reading an inventory document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("failed to parse inventory: {0}")]
    Parse(String),

    #[error("chassis {0} is listed more than once")]
    DuplicateChassis(EntityLookup),

    #[error("control card {0} is listed more than once")]
    DuplicateControlCard(String),

    #[error("chassis {chassis:?} is missing {field}")]
    MissingField { chassis: String, field: &'static str },
}

/// Server-wide options carried in the inventory file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Address devices are told to reach the bootstrap server at.
    pub bootz_server: String,
    /// Directory holding the security artifacts.
    pub artifact_dir: String,
}

/// Intended operating system image for a chassis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareImage {
    pub name: String,
    pub version: String,
    pub url: String,
    pub os_image_hash: String,
    pub hash_algorithm: String,
}

/// Files that make up a device's boot configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfigFiles {
    /// Vendor specific configuration, served verbatim.
    pub vendor_config_file: String,
    /// OpenConfig JSON document.
    pub oc_config_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_config: Option<BootConfigFiles>,
}

/// First-contact address assignment for a chassis or card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DhcpConfig {
    /// MAC address; when empty the entity is matched by serial number.
    pub hardware_address: String,
    /// Address in CIDR notation.
    pub ip_address: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCard {
    pub serial_number: String,
    #[serde(default)]
    pub part_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_config: Option<DhcpConfig>,
}

impl ControlCard {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chassis {
    #[serde(default)]
    pub name: String,
    pub serial_number: String,
    pub manufacturer: String,
    #[serde(default)]
    pub part_number: String,
    #[serde(default)]
    pub bootloader_password_hash: String,
    #[serde(default)]
    pub boot_mode: BootMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_image: Option<SoftwareImage>,
    #[serde(default)]
    pub config: ChassisConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_config: Option<DhcpConfig>,
    #[serde(default)]
    pub controller_cards: Vec<ControlCard>,
}

impl Chassis {
    pub fn new(
        boot_mode: BootMode,
        manufacturer: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            boot_mode,
            manufacturer: manufacturer.into(),
            serial_number: serial_number.into(),
            ..Default::default()
        }
    }

    /// The key this chassis is stored under.
    pub fn lookup(&self) -> EntityLookup {
        EntityLookup::new(&self.manufacturer, &self.serial_number)
    }

    pub fn find_card(&self, serial: &str) -> Option<&ControlCard> {
        self.controller_cards
            .iter()
            .find(|c| c.serial_number == serial)
    }

    pub fn boot_config(&self) -> Option<&BootConfigFiles> {
        self.config.boot_config.as_ref()
    }
}

/// The whole inventory document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub chassis: Vec<Chassis>,
}

impl Inventory {
    /// Parse and validate a TOML inventory.
    pub fn from_toml_str(text: &str) -> Result<Self, InventoryError> {
        let inventory: Self =
            toml::from_str(text).map_err(|e| InventoryError::Parse(e.message().to_string()))?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Every chassis key must be unique, and so must every card serial
    /// across the whole inventory.
    pub fn validate(&self) -> Result<(), InventoryError> {
        let mut chassis_keys = HashSet::new();
        let mut card_serials = HashSet::new();

        for chassis in &self.chassis {
            if chassis.serial_number.is_empty() {
                return Err(InventoryError::MissingField {
                    chassis: chassis.name.clone(),
                    field: "serial_number",
                });
            }
            if chassis.manufacturer.is_empty() {
                return Err(InventoryError::MissingField {
                    chassis: chassis.name.clone(),
                    field: "manufacturer",
                });
            }
            if !chassis_keys.insert(chassis.lookup()) {
                return Err(InventoryError::DuplicateChassis(chassis.lookup()));
            }
            for card in &chassis.controller_cards {
                if !card_serials.insert(card.serial_number.as_str()) {
                    return Err(InventoryError::DuplicateControlCard(
                        card.serial_number.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}
