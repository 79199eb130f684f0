//! Lifecycle ledger for in-flight device bootstraps.
//!
//! One exclusive lock covers the connected chassis set, the per-card boot
//! logs and the failed request log. Callers hold it for the whole of an
//! operation, so no two bootstrap operations interleave.

use bootz_core::{BootMode, ControlCardStatus, EntityLookup};
use bootz_proto::{BootstrapDataResponse, GetBootstrapDataRequest};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};

/// Lifecycle record for one control card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootLog {
    pub boot_mode: BootMode,
    /// Unix milliseconds.
    pub start_timestamp: i64,
    /// Unix milliseconds; zero until the card reports `Initialized`.
    pub end_timestamp: i64,
    pub status: Vec<ControlCardStatus>,
    pub last_status: ControlCardStatus,
    pub boot_request: Option<GetBootstrapDataRequest>,
    pub boot_response: Option<BootstrapDataResponse>,
    pub error: Option<String>,
}

impl BootLog {
    /// Append a reported status. `Initialized` stamps the end time.
    pub fn record_status(&mut self, status: ControlCardStatus, now_ms: i64) {
        self.status.push(status);
        self.last_status = status;
        if status.is_terminal() {
            self.end_timestamp = now_ms;
        }
    }
}

/// The state guarded by the ledger lock.
#[derive(Debug, Default)]
pub struct LedgerState {
    connected_chassis: HashSet<EntityLookup>,
    active_boots: HashMap<String, BootLog>,
    failed_requests: HashMap<String, String>,
}

impl LedgerState {
    pub fn mark_connected(&mut self, lookup: EntityLookup) {
        self.connected_chassis.insert(lookup);
    }

    pub fn is_connected(&self, lookup: &EntityLookup) -> bool {
        self.connected_chassis.contains(lookup)
    }

    /// Start (or restart) the boot log for a card.
    pub fn begin_boot(
        &mut self,
        serial: &str,
        boot_mode: BootMode,
        request: &GetBootstrapDataRequest,
        now_ms: i64,
    ) -> &mut BootLog {
        let log = BootLog {
            boot_mode,
            start_timestamp: now_ms,
            boot_request: Some(request.clone()),
            ..Default::default()
        };
        let slot = self.active_boots.entry(serial.to_string()).or_default();
        *slot = log;
        slot
    }

    pub fn boot_log(&self, serial: &str) -> Option<&BootLog> {
        self.active_boots.get(serial)
    }

    pub fn boot_log_mut(&mut self, serial: &str) -> Option<&mut BootLog> {
        self.active_boots.get_mut(serial)
    }

    /// Remember why a request was refused, keyed by its rendering.
    pub fn record_failure(&mut self, request: &GetBootstrapDataRequest, error: impl ToString) {
        self.failed_requests
            .insert(request_key(request), error.to_string());
    }

    pub fn failed_requests(&self) -> &HashMap<String, String> {
        &self.failed_requests
    }

    pub fn reset(&mut self) {
        self.connected_chassis.clear();
        self.active_boots.clear();
        self.failed_requests.clear();
    }
}

/// Process-wide ledger, injected into the bootstrap service.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the ledger for the duration of one operation.
    pub async fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().await
    }
}

/// Canonical text for a request, used as the failed request key.
pub fn request_key(request: &GetBootstrapDataRequest) -> String {
    format!("{:?}", request)
}

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootz_proto::ChassisDescriptor;

    fn request(serial: &str) -> GetBootstrapDataRequest {
        GetBootstrapDataRequest {
            chassis_descriptor: Some(ChassisDescriptor {
                manufacturer: "Cisco".to_string(),
                serial_number: serial.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_status() {
        let mut log = BootLog::default();

        log.record_status(ControlCardStatus::NotInitialized, 10);
        assert_eq!(log.last_status, ControlCardStatus::NotInitialized);
        assert_eq!(log.end_timestamp, 0);

        log.record_status(ControlCardStatus::Initialized, 20);
        assert_eq!(
            log.status,
            vec![ControlCardStatus::NotInitialized, ControlCardStatus::Initialized]
        );
        assert_eq!(log.last_status, ControlCardStatus::Initialized);
        assert_eq!(log.end_timestamp, 20);
    }

    #[test]
    fn test_begin_boot_overwrites() {
        let mut state = LedgerState::default();

        state
            .begin_boot("123A", BootMode::Insecure, &request("123"), 1)
            .error = Some("boom".to_string());
        let log = state.begin_boot("123A", BootMode::Secure, &request("123"), 2);

        assert_eq!(log.boot_mode, BootMode::Secure);
        assert_eq!(log.start_timestamp, 2);
        assert_eq!(log.last_status, ControlCardStatus::Unspecified);
        assert!(log.error.is_none());
        assert_eq!(log.boot_request, Some(request("123")));
    }

    #[test]
    fn test_failed_requests_keyed_by_content() {
        let mut state = LedgerState::default();
        state.record_failure(&request("123"), "first");
        state.record_failure(&request("123"), "second");
        state.record_failure(&request("456"), "other");

        assert_eq!(state.failed_requests().len(), 2);
        assert_eq!(state.failed_requests()[&request_key(&request("123"))], "second");
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let ledger = Ledger::new();
        {
            let mut state = ledger.lock().await;
            state.mark_connected(EntityLookup::new("Cisco", "123"));
            state.begin_boot("123A", BootMode::Insecure, &request("123"), 1);
            state.record_failure(&request("999"), "not found");
        }

        let mut state = ledger.lock().await;
        assert!(state.is_connected(&EntityLookup::new("Cisco", "123")));
        state.reset();
        assert!(!state.is_connected(&EntityLookup::new("Cisco", "123")));
        assert!(state.boot_log("123A").is_none());
        assert!(state.failed_requests().is_empty());
    }
}
