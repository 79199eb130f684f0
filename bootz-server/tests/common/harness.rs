//! Test harness for bootstrap E2E tests.
//!
//! Uses tonic's pattern of passing the server directly to the client (no
//! network), backed by the checked-in test PKI and inventory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bootz_auth::OwnershipVoucher;
use bootz_proto::bootstrap_client::BootstrapClient;
use bootz_proto::bootstrap_server::BootstrapServer;
use bootz_proto::control_card_state::ControlCardStatus;
use bootz_proto::{
    ChassisDescriptor, ControlCard, ControlCardState, GetBootstrapDataRequest, ReportStatusRequest,
};
use bootz_server::{BootstrapService, InMemoryEntityManager, Ledger};

pub type TestClient = BootstrapClient<BootstrapServer<BootstrapService>>;

/// Directory holding the test PKI, configs and inventories.
pub fn testdata() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../testdata")
}

/// A bootstrap service over `testdata/inventory.toml`.
pub struct TestServer {
    pub service: BootstrapService,
}

impl TestServer {
    pub fn new() -> Self {
        let em = InMemoryEntityManager::new(testdata().join("inventory.toml"))
            .expect("Failed to load test inventory");
        let service = BootstrapService::new(Arc::new(em), Arc::new(Ledger::new()));
        Self { service }
    }

    /// A client that talks directly to this server's service (no network).
    pub fn client(&self) -> TestClient {
        BootstrapClient::new(BootstrapServer::new(self.service.clone()))
    }
}

/// Build a bootstrap request for a Cisco chassis.
pub fn bootstrap_request(chassis: &str, cards: &[&str], nonce: &str) -> GetBootstrapDataRequest {
    GetBootstrapDataRequest {
        chassis_descriptor: Some(ChassisDescriptor {
            manufacturer: "Cisco".to_string(),
            serial_number: chassis.to_string(),
            control_cards: cards
                .iter()
                .map(|serial| ControlCard {
                    serial_number: serial.to_string(),
                    part_number: serial.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        control_card_state: None,
        nonce: nonce.to_string(),
    }
}

/// Build a status report with one state per serial.
pub fn status_report(serials: &[&str], status: ControlCardStatus) -> ReportStatusRequest {
    ReportStatusRequest {
        status_message: "Bootstrap status succeeded".to_string(),
        states: serials
            .iter()
            .map(|serial| ControlCardState {
                serial_number: serial.to_string(),
                status: status as i32,
            })
            .collect(),
        ..Default::default()
    }
}

/// Raw voucher bytes as stored on disk for a card.
pub fn voucher_on_file(serial: &str) -> Vec<u8> {
    let text = std::fs::read_to_string(testdata().join(format!("ov_{}.txt", serial)))
        .expect("Failed to read voucher");
    OwnershipVoucher::from_base64(&text)
        .expect("Failed to decode voucher")
        .to_vec()
}

/// The Ownership Certificate PEM the server signs with.
pub fn oc_cert_pem() -> String {
    std::fs::read_to_string(testdata().join("oc_pub.pem")).expect("Failed to read OC cert")
}
