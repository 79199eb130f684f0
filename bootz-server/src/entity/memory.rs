//! In-memory entity manager backed by a static inventory.
//!
//! Reads take a lock-free snapshot of the inventory. Administrative writes
//! build a new map and swap it in, so request handlers never block on them.

use super::{populate_boot_config, EntityError, EntityManager};
use crate::artifacts::SecurityArtifacts;
use crate::convert::software_image_to_proto;
use arc_swap::ArcSwap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bootz_core::{BootMode, Chassis, ChassisEntity, ControlCard, EntityLookup, Inventory, Options};
use bootz_proto::{
    BootConfig, BootstrapDataResponse, ControlCard as ProtoControlCard, Credentials,
    GetBootstrapDataResponse, ReportStatusRequest,
};
use prost::Message;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type ChassisMap = BTreeMap<EntityLookup, Chassis>;

/// Read and validate an inventory file.
fn load_inventory(path: &Path) -> Result<Inventory, EntityError> {
    let text = std::fs::read_to_string(path).map_err(|source| EntityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Inventory::from_toml_str(&text).map_err(|e| EntityError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Network addresses handed to a device on first contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAssignment {
    pub ip_address: String,
    pub gateway: String,
}

/// Entity manager serving a static inventory from memory.
pub struct InMemoryEntityManager {
    chassis: ArcSwap<ChassisMap>,
    options: Options,
    /// Directory relative config file paths are resolved against.
    base_dir: PathBuf,
    artifacts: Option<Arc<SecurityArtifacts>>,
}

impl InMemoryEntityManager {
    /// An empty inventory with no security artifacts.
    pub fn empty() -> Self {
        Self::from_inventory(Inventory::default(), ".")
    }

    /// Load an inventory file and the security artifacts it points at.
    ///
    /// An empty path yields an empty inventory and no artifacts.
    pub fn new(inventory_path: impl AsRef<Path>) -> Result<Self, EntityError> {
        Self::load(Some(inventory_path.as_ref()), None)
    }

    /// Load the inventory, then the security artifacts.
    ///
    /// `artifact_dir` overrides the inventory's `options.artifact_dir`, which
    /// is resolved against the inventory file's directory. With neither set
    /// the manager has no artifacts.
    pub fn load(
        inventory_path: Option<&Path>,
        artifact_dir: Option<&Path>,
    ) -> Result<Self, EntityError> {
        let (inventory, base_dir) = match inventory_path.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => (load_inventory(path)?, base_dir_of(path)),
            None => (Inventory::default(), PathBuf::from(".")),
        };

        let artifact_dir = match artifact_dir.filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => Some(dir.to_path_buf()),
            None if !inventory.options.artifact_dir.is_empty() => {
                Some(base_dir.join(&inventory.options.artifact_dir))
            }
            None => None,
        };

        let manager = Self::from_inventory(inventory, base_dir);
        let Some(dir) = artifact_dir else {
            return Ok(manager);
        };
        tracing::info!(path = %dir.display(), "Loading security artifacts");
        let artifacts =
            SecurityArtifacts::load(&dir).map_err(|source| EntityError::Artifacts { dir, source })?;
        Ok(manager.with_artifacts(Arc::new(artifacts)))
    }

    /// Serve `inventory` without security artifacts.
    pub fn from_inventory(inventory: Inventory, base_dir: impl Into<PathBuf>) -> Self {
        let chassis = inventory
            .chassis
            .into_iter()
            .map(|c| (c.lookup(), c))
            .collect::<ChassisMap>();
        Self {
            chassis: ArcSwap::from_pointee(chassis),
            options: inventory.options,
            base_dir: base_dir.into(),
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<SecurityArtifacts>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn artifacts(&self) -> Option<&Arc<SecurityArtifacts>> {
        self.artifacts.as_ref()
    }

    fn require_artifacts(&self) -> Result<&SecurityArtifacts, EntityError> {
        self.artifacts
            .as_deref()
            .ok_or_else(|| EntityError::Internal("security artifacts are not loaded".to_string()))
    }

    /// Raw Ownership Voucher bytes for a control card.
    pub fn fetch_ownership_voucher(
        &self,
        lookup: &EntityLookup,
        serial: &str,
    ) -> Result<Vec<u8>, EntityError> {
        let artifacts = self.require_artifacts()?;
        artifacts
            .voucher(serial)
            .map(|ov| ov.to_vec())
            .ok_or_else(|| {
                EntityError::NotFound(format!(
                    "no ownership voucher for control card {} of chassis {}",
                    serial, lookup
                ))
            })
    }

    // ------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------

    /// Add (or overwrite) a chassis with no control cards.
    pub fn add_chassis(
        &self,
        boot_mode: BootMode,
        manufacturer: &str,
        serial: &str,
    ) -> ChassisHandle<'_> {
        let chassis = Chassis::new(boot_mode, manufacturer, serial);
        let lookup = chassis.lookup();
        self.update(|map| {
            map.insert(lookup.clone(), chassis.clone());
        });
        ChassisHandle {
            manager: self,
            lookup,
        }
    }

    pub fn get_device(&self, lookup: &EntityLookup) -> Result<Chassis, EntityError> {
        self.chassis
            .load()
            .get(lookup)
            .cloned()
            .ok_or_else(|| EntityError::not_found_chassis(lookup))
    }

    /// Snapshot of the whole inventory.
    pub fn get_all(&self) -> Arc<ChassisMap> {
        self.chassis.load_full()
    }

    /// Replace the chassis stored under `lookup` with `chassis`, which is
    /// stored under its own key. Fails without changes if one of its cards
    /// belongs to another chassis.
    pub fn replace_device(&self, lookup: &EntityLookup, chassis: Chassis) -> Result<(), EntityError> {
        if chassis.serial_number.is_empty() || chassis.manufacturer.is_empty() {
            return Err(EntityError::InvalidArgument(
                "replacement chassis needs a serial number and manufacturer".to_string(),
            ));
        }
        let key = chassis.lookup();
        let mut result = Ok(());
        self.update(|map| {
            let previous = map.remove(lookup);
            let overwritten = map.remove(&key);
            result = claim_cards(map, &chassis);
            if result.is_ok() {
                map.insert(key.clone(), chassis.clone());
                return;
            }
            if let Some(previous) = previous {
                map.insert(lookup.clone(), previous);
            }
            if let Some(overwritten) = overwritten {
                map.insert(key.clone(), overwritten);
            }
        });
        result
    }

    /// Remove a chassis. Unknown keys are ignored.
    pub fn delete_device(&self, lookup: &EntityLookup) {
        self.update(|map| {
            map.remove(lookup);
        });
    }

    /// Addresses for the external DHCP service, keyed by hardware address
    /// or, when that is empty, by serial number.
    pub fn address_assignments(&self) -> BTreeMap<String, AddressAssignment> {
        let inventory = self.chassis.load();
        let mut assignments = BTreeMap::new();

        for chassis in inventory.values() {
            let entities = std::iter::once((&chassis.serial_number, &chassis.dhcp_config)).chain(
                chassis
                    .controller_cards
                    .iter()
                    .map(|card| (&card.serial_number, &card.dhcp_config)),
            );
            for (serial, dhcp) in entities {
                let Some(dhcp) = dhcp else {
                    continue;
                };
                let key = if dhcp.hardware_address.is_empty() {
                    serial.clone()
                } else {
                    dhcp.hardware_address.clone()
                };
                assignments.insert(
                    key,
                    AddressAssignment {
                        ip_address: dhcp.ip_address.clone(),
                        gateway: dhcp.gateway.clone(),
                    },
                );
            }
        }
        assignments
    }

    fn update(&self, mut apply: impl FnMut(&mut ChassisMap)) {
        self.chassis.rcu(|current| {
            let mut next = ChassisMap::clone(current);
            apply(&mut next);
            next
        });
    }

    // ------------------------------------------------------------------
    // Request path helpers
    // ------------------------------------------------------------------

    /// Find the chassis that should answer for `card` (or for the chassis
    /// itself). With no chassis serial, the card is located across the
    /// whole inventory and its chassis must match the manufacturer.
    fn locate<'a>(
        inventory: &'a ChassisMap,
        lookup: &EntityLookup,
        card: Option<&ProtoControlCard>,
    ) -> Result<&'a Chassis, EntityError> {
        let Some(card) = card else {
            return inventory
                .get(lookup)
                .ok_or_else(|| EntityError::not_found_chassis(lookup));
        };

        let chassis = if lookup.serial_number.is_empty() {
            inventory
                .values()
                .find(|c| c.find_card(&card.serial_number).is_some())
        } else {
            inventory.get(lookup)
        };

        match chassis {
            Some(c)
                if c.manufacturer == lookup.manufacturer
                    && c.find_card(&card.serial_number).is_some() =>
            {
                Ok(c)
            }
            _ => Err(EntityError::NotFound(format!(
                "could not find control card with serial#: {} and manufacturer: {}",
                card.serial_number, lookup.manufacturer
            ))),
        }
    }

    fn server_trust_cert(&self) -> String {
        self.artifacts
            .as_ref()
            .map(|a| STANDARD.encode(a.pdc_cert_der()))
            .unwrap_or_default()
    }
}

impl Default for InMemoryEntityManager {
    fn default() -> Self {
        Self::empty()
    }
}

impl EntityManager for InMemoryEntityManager {
    fn resolve_chassis(
        &self,
        lookup: &EntityLookup,
        card_serial: &str,
    ) -> Result<ChassisEntity, EntityError> {
        let inventory = self.chassis.load();

        let chassis = inventory.get(lookup).or_else(|| {
            if !lookup.serial_number.is_empty() || card_serial.is_empty() {
                return None;
            }
            inventory.values().find(|c| {
                c.manufacturer == lookup.manufacturer && c.find_card(card_serial).is_some()
            })
        });

        chassis
            .map(|c| ChassisEntity {
                boot_mode: c.boot_mode,
            })
            .ok_or_else(|| EntityError::not_found_chassis(lookup))
    }

    fn get_bootstrap_data(
        &self,
        lookup: &EntityLookup,
        card: Option<&ProtoControlCard>,
    ) -> Result<BootstrapDataResponse, EntityError> {
        let inventory = self.chassis.load();
        let chassis = Self::locate(&inventory, lookup, card)?;

        let serial_num = match card {
            Some(card) => card.serial_number.clone(),
            None => chassis.serial_number.clone(),
        };
        let boot_config = match chassis.boot_config() {
            Some(files) => populate_boot_config(files, &self.base_dir)?,
            None => BootConfig::default(),
        };

        Ok(BootstrapDataResponse {
            serial_num,
            intended_image: chassis.software_image.as_ref().map(software_image_to_proto),
            boot_password_hash: chassis.bootloader_password_hash.clone(),
            server_trust_cert: self.server_trust_cert(),
            boot_config: Some(boot_config),
            credentials: Some(Credentials::default()),
        })
    }

    fn set_status(&self, report: &ReportStatusRequest) -> Result<(), EntityError> {
        if report.states.is_empty() {
            return Err(EntityError::InvalidArgument(
                "status report carries no control card states".to_string(),
            ));
        }

        let inventory = self.chassis.load();
        for state in &report.states {
            let known = inventory
                .values()
                .any(|c| c.find_card(&state.serial_number).is_some());
            if !known {
                return Err(EntityError::NotFound(format!(
                    "control card {} is not in the inventory",
                    state.serial_number
                )));
            }
        }
        Ok(())
    }

    fn sign(
        &self,
        response: &mut GetBootstrapDataResponse,
        lookup: &EntityLookup,
        card_serial: &str,
    ) -> Result<(), EntityError> {
        let Some(signed) = response.signed_response.as_ref() else {
            return Err(EntityError::InvalidArgument(
                "response has no signed payload".to_string(),
            ));
        };
        let artifacts = self.require_artifacts()?;

        let signature = artifacts
            .oc_signer()
            .sign(&signed.encode_to_vec())
            .map_err(|e| EntityError::Internal(e.to_string()))?;
        let voucher = self.fetch_ownership_voucher(lookup, card_serial)?;

        response.response_signature = signature.to_base64();
        response.ownership_certificate = artifacts.oc.cert_pem().as_bytes().to_vec();
        response.ownership_voucher = voucher;
        Ok(())
    }
}

/// Handle returned by [`InMemoryEntityManager::add_chassis`] for attaching
/// control cards to the chassis just added.
pub struct ChassisHandle<'a> {
    manager: &'a InMemoryEntityManager,
    lookup: EntityLookup,
}

impl ChassisHandle<'_> {
    /// Attach a card. A serial already on another chassis is refused.
    pub fn add_control_card(self, serial: &str) -> Result<Self, EntityError> {
        let mut result = Ok(());
        self.manager.update(|map| {
            result = Ok(());
            let owner = map
                .iter()
                .find(|(_, c)| c.find_card(serial).is_some())
                .map(|(key, _)| key.clone());
            match owner {
                Some(key) if key == self.lookup => {}
                Some(key) => result = Err(duplicate_card(serial, &key)),
                None => {
                    if let Some(chassis) = map.get_mut(&self.lookup) {
                        chassis.controller_cards.push(ControlCard::new(serial));
                    }
                }
            }
        });
        result.map(|()| self)
    }

    pub fn lookup(&self) -> &EntityLookup {
        &self.lookup
    }
}

/// Check that none of `chassis`'s card serials appear in `others`, nor
/// twice within `chassis` itself.
fn claim_cards(others: &ChassisMap, chassis: &Chassis) -> Result<(), EntityError> {
    let mut seen = std::collections::HashSet::new();
    for card in &chassis.controller_cards {
        let serial = card.serial_number.as_str();
        if !seen.insert(serial) {
            return Err(duplicate_card(serial, &chassis.lookup()));
        }
        if let Some(owner) = others.values().find(|c| c.find_card(serial).is_some()) {
            return Err(duplicate_card(serial, &owner.lookup()));
        }
    }
    Ok(())
}

fn duplicate_card(serial: &str, owner: &EntityLookup) -> EntityError {
    EntityError::InvalidArgument(format!(
        "control card {} already belongs to chassis {}",
        serial, owner
    ))
}

fn base_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
