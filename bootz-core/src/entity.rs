//! Chassis identity and lifecycle types.

use serde::{Deserialize, Serialize};

/// Key that resolves a chassis in the inventory.
///
/// A plain value: compared, hashed and copied by value wherever it is used
/// as a map key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityLookup {
    pub manufacturer: String,
    pub serial_number: String,
}

impl EntityLookup {
    pub fn new(manufacturer: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            serial_number: serial_number.into(),
        }
    }
}

impl std::fmt::Display for EntityLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.manufacturer, self.serial_number)
    }
}

/// Boot policy of a chassis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    #[default]
    Unspecified,
    /// Unsigned bootstrap data is acceptable.
    Insecure,
    /// Only nonce-backed, signed bootstrap data is acceptable.
    Secure,
}

impl BootMode {
    /// Whether a request without a nonce must be refused.
    pub fn requires_nonce(self) -> bool {
        matches!(self, Self::Secure)
    }
}

/// The resolved view of a chassis the orchestrator needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChassisEntity {
    pub boot_mode: BootMode,
}

/// Progress reported by a control card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCardStatus {
    #[default]
    Unspecified,
    NotInitialized,
    Initialized,
}

impl ControlCardStatus {
    /// `Initialized` ends a card's boot.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_is_value_keyed() {
        let mut connected = HashMap::new();
        connected.insert(EntityLookup::new("Cisco", "123"), true);

        // A separately built key with equal fields finds the same entry.
        let key = EntityLookup {
            manufacturer: "Cisco".to_string(),
            serial_number: "123".to_string(),
        };
        assert_eq!(connected.get(&key), Some(&true));
        assert_eq!(connected.get(&EntityLookup::new("Cisco", "456")), None);
        assert_eq!(connected.get(&EntityLookup::new("cisco", "123")), None);
    }

    #[test]
    fn lookup_display() {
        assert_eq!(EntityLookup::new("Cisco", "123").to_string(), "Cisco/123");
    }

    #[test]
    fn boot_mode_snake_case() {
        assert_eq!(
            serde_json::to_string(&BootMode::Insecure).unwrap(),
            r#""insecure""#
        );
        assert_eq!(
            serde_json::from_str::<BootMode>(r#""secure""#).unwrap(),
            BootMode::Secure
        );
    }

    #[test]
    fn only_secure_requires_nonce() {
        assert!(BootMode::Secure.requires_nonce());
        assert!(!BootMode::Insecure.requires_nonce());
        assert!(!BootMode::Unspecified.requires_nonce());
    }

    #[test]
    fn only_initialized_is_terminal() {
        assert!(ControlCardStatus::Initialized.is_terminal());
        assert!(!ControlCardStatus::NotInitialized.is_terminal());
        assert!(!ControlCardStatus::Unspecified.is_terminal());
    }
}
