//! Bootstrap gRPC service implementation.

use super::ledger::{now_ms, BootLog, Ledger, LedgerState};
use crate::convert::status_from_proto;
use crate::entity::{EntityError, EntityManager};
use crate::tls::TlsConnectInfo;
use bootz_core::{BootMode, EntityLookup, ErrorList};
use bootz_proto::bootstrap_server::Bootstrap;
use bootz_proto::{
    BootstrapDataResponse, BootstrapDataSigned, ControlCard, EmptyResponse,
    GetBootstrapDataRequest, GetBootstrapDataResponse, ReportStatusRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Request-facing orchestrator for the bootstrap protocol.
#[derive(Clone)]
pub struct BootstrapService {
    entity_manager: Arc<dyn EntityManager>,
    ledger: Arc<Ledger>,
}

impl BootstrapService {
    pub fn new(entity_manager: Arc<dyn EntityManager>, ledger: Arc<Ledger>) -> Self {
        Self {
            entity_manager,
            ledger,
        }
    }

    /// Whether a chassis has made a resolvable bootstrap request.
    pub async fn is_chassis_connected(&self, lookup: &EntityLookup) -> bool {
        self.ledger.lock().await.is_connected(lookup)
    }

    /// Copy of the boot log for a control card.
    pub async fn get_boot_status(&self, serial: &str) -> Result<BootLog, EntityError> {
        self.ledger
            .lock()
            .await
            .boot_log(serial)
            .cloned()
            .ok_or_else(|| {
                EntityError::NotFound(format!("no boot log found for control card {}", serial))
            })
    }

    /// Refused requests and why, keyed by request rendering.
    pub async fn failed_requests(&self) -> HashMap<String, String> {
        self.ledger.lock().await.failed_requests().clone()
    }

    /// Forget every chassis, boot log and failed request.
    pub async fn reset_status(&self) {
        self.ledger.lock().await.reset();
        tracing::info!("Bootstrap ledger reset");
    }

    async fn handle_get_bootstrap_data(
        &self,
        req: GetBootstrapDataRequest,
    ) -> Result<GetBootstrapDataResponse, Status> {
        let mut ledger = self.ledger.lock().await;

        let descriptor = req.chassis_descriptor.clone().unwrap_or_default();
        let lookup = EntityLookup::new(&descriptor.manufacturer, &descriptor.serial_number);

        // A chassis with no explicit cards is never served chassis-level
        // data; it must name at least one card.
        let cards = match descriptor.control_cards.as_slice() {
            [] => {
                let status = Status::invalid_argument(
                    "request must include at least one control card",
                );
                ledger.record_failure(&req, status.message());
                return Err(status);
            }
            cards => cards,
        };

        let chassis = match self
            .entity_manager
            .resolve_chassis(&lookup, &cards[0].serial_number)
        {
            Ok(chassis) => chassis,
            Err(e) => {
                let status = Status::invalid_argument(format!(
                    "failed to resolve chassis {} to inventory: {}",
                    lookup, e
                ));
                ledger.record_failure(&req, status.message());
                return Err(status);
            }
        };
        tracing::info!(chassis = %lookup, boot_mode = ?chassis.boot_mode, "Chassis resolved");
        ledger.mark_connected(lookup.clone());

        if chassis.boot_mode.requires_nonce() && req.nonce.is_empty() {
            return Err(Status::invalid_argument(
                "chassis requires secure boot only",
            ));
        }

        let responses = self
            .fetch_card_data(&mut ledger, &req, &lookup, cards, chassis.boot_mode)
            .await?;

        let mut response = GetBootstrapDataResponse {
            signed_response: Some(BootstrapDataSigned {
                responses,
                nonce: String::new(),
            }),
            ..Default::default()
        };
        if req.nonce.is_empty() {
            return Ok(response);
        }

        if let Some(signed) = response.signed_response.as_mut() {
            signed.nonce = req.nonce.clone();
        }
        let serial = req
            .control_card_state
            .as_ref()
            .map(|s| s.serial_number.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&cards[0].serial_number)
            .to_string();

        let (response, signed) = {
            let lookup = lookup.clone();
            let serial = serial.clone();
            self.off_runtime(move |em| {
                let mut response = response;
                let result = em.sign(&mut response, &lookup, &serial);
                (response, result)
            })
            .await?
        };
        if let Err(e) = signed {
            tracing::error!(chassis = %lookup, serial = %serial, error = %e, "Signing failed");
            return Err(Status::internal("failed to sign bootz response"));
        }
        tracing::info!(chassis = %lookup, serial = %serial, "Response signed");

        Ok(response)
    }

    /// Build each card's payload, recording every attempt in the ledger.
    /// One card failing does not stop the others.
    async fn fetch_card_data(
        &self,
        ledger: &mut LedgerState,
        req: &GetBootstrapDataRequest,
        lookup: &EntityLookup,
        cards: &[ControlCard],
        boot_mode: BootMode,
    ) -> Result<Vec<BootstrapDataResponse>, Status> {
        let started = now_ms();
        let fetched = {
            let lookup = lookup.clone();
            let cards = cards.to_vec();
            self.off_runtime(move |em| {
                cards
                    .iter()
                    .map(|card| em.get_bootstrap_data(&lookup, Some(card)))
                    .collect::<Vec<_>>()
            })
            .await?
        };

        let mut errors = ErrorList::new();
        let mut responses = Vec::with_capacity(cards.len());
        for (card, result) in cards.iter().zip(fetched) {
            let serial = card.serial_number.as_str();
            let log = ledger.begin_boot(serial, boot_mode, req, started);
            match result {
                Ok(data) => {
                    log.boot_response = Some(data.clone());
                    responses.push(data);
                }
                Err(e) => {
                    tracing::warn!(chassis = %lookup, serial = %serial, error = %e, "Failed to fetch bootstrap data");
                    log.error = Some(e.to_string());
                    errors.add(e);
                }
            }
        }

        errors.into_result().map_err(EntityError::from)?;
        Ok(responses)
    }

    /// Run entity manager work (config file reads, RSA signing) on the
    /// blocking pool. Callers keep holding the ledger lock across the await.
    async fn off_runtime<T, F>(&self, work: F) -> Result<T, Status>
    where
        F: FnOnce(&dyn EntityManager) -> T + Send + 'static,
        T: Send + 'static,
    {
        let em = Arc::clone(&self.entity_manager);
        tokio::task::spawn_blocking(move || work(em.as_ref()))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Entity manager task failed");
                Status::internal("entity manager task failed")
            })
    }

    async fn handle_report_status(&self, req: ReportStatusRequest) -> Result<(), EntityError> {
        let mut ledger = self.ledger.lock().await;

        self.entity_manager.set_status(&req)?;

        if let Some(missing) = req
            .states
            .iter()
            .find(|s| ledger.boot_log(&s.serial_number).is_none())
        {
            return Err(EntityError::NotFound(format!(
                "no boot log found for control card {}",
                missing.serial_number
            )));
        }

        let now = now_ms();
        for state in &req.states {
            let status = status_from_proto(state.status());
            if let Some(log) = ledger.boot_log_mut(&state.serial_number) {
                log.record_status(status, now);
            }
            tracing::info!(serial = %state.serial_number, status = ?status, "Control card status updated");
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl Bootstrap for BootstrapService {
    async fn get_bootstrap_data(
        &self,
        request: Request<GetBootstrapDataRequest>,
    ) -> Result<Response<GetBootstrapDataResponse>, Status> {
        let peer = request
            .extensions()
            .get::<TlsConnectInfo>()
            .and_then(|info| info.remote_addr);
        let req = request.into_inner();

        if let Some(descriptor) = req.chassis_descriptor.as_ref() {
            tracing::info!(
                peer = ?peer,
                manufacturer = %descriptor.manufacturer,
                serial = %descriptor.serial_number,
                cards = descriptor.control_cards.len(),
                nonce = !req.nonce.is_empty(),
                "GetBootstrapData request"
            );
        }

        let response = self.handle_get_bootstrap_data(req).await?;
        Ok(Response::new(response))
    }

    async fn report_status(
        &self,
        request: Request<ReportStatusRequest>,
    ) -> Result<Response<EmptyResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(
            status = ?req.status(),
            message = %req.status_message,
            states = req.states.len(),
            "ReportStatus request"
        );

        self.handle_report_status(req).await?;
        Ok(Response::new(EmptyResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootz_core::{ChassisEntity, ControlCardStatus};
    use bootz_proto::control_card_state::ControlCardStatus as ProtoStatus;
    use bootz_proto::{ChassisDescriptor, ControlCardState};
    use std::sync::Mutex;
    use std::thread::ThreadId;

    /// Entity manager with scripted answers that records what it was asked.
    #[derive(Default)]
    struct MockEntityManager {
        boot_mode: BootMode,
        failing_cards: Vec<String>,
        reject_status: bool,
        signed_for: Mutex<Vec<String>>,
        /// Threads that ran payload and signing calls.
        worker_threads: Mutex<Vec<ThreadId>>,
    }

    impl MockEntityManager {
        fn note_thread(&self) {
            self.worker_threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
        }
    }

    impl EntityManager for MockEntityManager {
        fn resolve_chassis(
            &self,
            lookup: &EntityLookup,
            _card_serial: &str,
        ) -> Result<ChassisEntity, EntityError> {
            if lookup.serial_number == "unknown" {
                return Err(EntityError::not_found_chassis(lookup));
            }
            Ok(ChassisEntity {
                boot_mode: self.boot_mode,
            })
        }

        fn get_bootstrap_data(
            &self,
            _lookup: &EntityLookup,
            card: Option<&ControlCard>,
        ) -> Result<BootstrapDataResponse, EntityError> {
            self.note_thread();
            let serial = card.map(|c| c.serial_number.clone()).unwrap_or_default();
            if self.failing_cards.contains(&serial) {
                return Err(EntityError::NotFound(format!("card {} missing", serial)));
            }
            Ok(BootstrapDataResponse {
                serial_num: serial,
                ..Default::default()
            })
        }

        fn set_status(&self, _report: &ReportStatusRequest) -> Result<(), EntityError> {
            if self.reject_status {
                return Err(EntityError::InvalidArgument("rejected".to_string()));
            }
            Ok(())
        }

        fn sign(
            &self,
            response: &mut GetBootstrapDataResponse,
            _lookup: &EntityLookup,
            card_serial: &str,
        ) -> Result<(), EntityError> {
            self.note_thread();
            if card_serial == "unsignable" {
                return Err(EntityError::NotFound("no voucher".to_string()));
            }
            self.signed_for
                .lock()
                .unwrap()
                .push(card_serial.to_string());
            response.response_signature = "signed".to_string();
            Ok(())
        }
    }

    fn service(em: MockEntityManager) -> (BootstrapService, Arc<MockEntityManager>) {
        let em = Arc::new(em);
        let svc = BootstrapService::new(em.clone(), Arc::new(Ledger::new()));
        (svc, em)
    }

    fn request(serial: &str, cards: &[&str], nonce: &str) -> GetBootstrapDataRequest {
        GetBootstrapDataRequest {
            chassis_descriptor: Some(ChassisDescriptor {
                manufacturer: "Cisco".to_string(),
                serial_number: serial.to_string(),
                control_cards: cards
                    .iter()
                    .map(|s| ControlCard {
                        serial_number: s.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            control_card_state: None,
            nonce: nonce.to_string(),
        }
    }

    fn report(serial: &str, status: ProtoStatus) -> ReportStatusRequest {
        ReportStatusRequest {
            states: vec![ControlCardState {
                serial_number: serial.to_string(),
                status: status as i32,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_card_list_only_records_failure() {
        let (svc, _) = service(MockEntityManager::default());

        let err = svc
            .handle_get_bootstrap_data(request("123", &[], ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        assert!(!svc.is_chassis_connected(&EntityLookup::new("Cisco", "123")).await);
        assert_eq!(svc.failed_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_chassis() {
        let (svc, _) = service(MockEntityManager::default());

        let err = svc
            .handle_get_bootstrap_data(request("unknown", &["1A"], ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let failed = svc.failed_requests().await;
        let reason = failed.values().next().unwrap();
        assert!(reason.contains("failed to resolve chassis"));
        assert!(svc.get_boot_status("1A").await.is_err());
    }

    #[tokio::test]
    async fn test_secure_chassis_requires_nonce() {
        let (svc, em) = service(MockEntityManager {
            boot_mode: BootMode::Secure,
            ..Default::default()
        });

        let err = svc
            .handle_get_bootstrap_data(request("123", &["123A"], ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        // The chassis did reach the server
        assert!(svc.is_chassis_connected(&EntityLookup::new("Cisco", "123")).await);
        assert!(svc.get_boot_status("123A").await.is_err());
        // No card payload was built
        assert!(em.worker_threads.lock().unwrap().is_empty());

        let ok = svc
            .handle_get_bootstrap_data(request("123", &["123A"], "N1"))
            .await
            .unwrap();
        assert_eq!(ok.signed_response.unwrap().nonce, "N1");
    }

    #[tokio::test]
    async fn test_entity_calls_leave_the_runtime_thread() {
        let (svc, em) = service(MockEntityManager::default());

        svc.handle_get_bootstrap_data(request("123", &["123A", "123B"], "N1"))
            .await
            .unwrap();

        // Two payloads and one signature, none on the test's runtime thread
        let runtime_thread = std::thread::current().id();
        let threads = em.worker_threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|t| *t != runtime_thread));
        let log = svc.get_boot_status("123B").await.unwrap();
        assert_eq!(log.boot_response.unwrap().serial_num, "123B");
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_both_logs() {
        let (svc, _) = service(MockEntityManager {
            boot_mode: BootMode::Insecure,
            failing_cards: vec!["123B".to_string()],
            ..Default::default()
        });

        let err = svc
            .handle_get_bootstrap_data(request("123", &["123A", "123B"], ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
        assert!(err.message().contains("card 123B missing"));

        let good = svc.get_boot_status("123A").await.unwrap();
        assert_eq!(good.boot_response.unwrap().serial_num, "123A");
        assert!(good.error.is_none());
        assert_eq!(good.boot_mode, BootMode::Insecure);
        assert!(good.start_timestamp > 0);

        let bad = svc.get_boot_status("123B").await.unwrap();
        assert!(bad.boot_response.is_none());
        assert!(bad.error.unwrap().contains("card 123B missing"));
    }

    #[tokio::test]
    async fn test_no_nonce_means_no_signature() {
        let (svc, em) = service(MockEntityManager::default());

        let response = svc
            .handle_get_bootstrap_data(request("123", &["123A", "123B"], ""))
            .await
            .unwrap();

        let signed = response.signed_response.unwrap();
        let serials: Vec<_> = signed.responses.iter().map(|r| r.serial_num.as_str()).collect();
        assert_eq!(serials, vec!["123A", "123B"]);
        assert!(signed.nonce.is_empty());
        assert!(response.response_signature.is_empty());
        assert!(em.signed_for.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signing_serial_selection() {
        let (svc, em) = service(MockEntityManager::default());

        // Falls back to the first card when the request names no state
        svc.handle_get_bootstrap_data(request("123", &["123A", "123B"], "N1"))
            .await
            .unwrap();

        let mut req = request("123", &["123A", "123B"], "N2");
        req.control_card_state = Some(ControlCardState {
            serial_number: "123B".to_string(),
            status: ProtoStatus::NotInitialized as i32,
        });
        svc.handle_get_bootstrap_data(req).await.unwrap();

        assert_eq!(*em.signed_for.lock().unwrap(), vec!["123A", "123B"]);
    }

    #[tokio::test]
    async fn test_signing_failure_is_internal() {
        let (svc, _) = service(MockEntityManager::default());

        let err = svc
            .handle_get_bootstrap_data(request("123", &["unsignable"], "N1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_report_status_commits_on_success() {
        let (svc, _) = service(MockEntityManager::default());
        svc.handle_get_bootstrap_data(request("123", &["123A"], ""))
            .await
            .unwrap();

        svc.handle_report_status(report("123A", ProtoStatus::NotInitialized))
            .await
            .unwrap();
        let log = svc.get_boot_status("123A").await.unwrap();
        assert_eq!(log.last_status, ControlCardStatus::NotInitialized);
        assert_eq!(log.end_timestamp, 0);

        svc.handle_report_status(report("123A", ProtoStatus::Initialized))
            .await
            .unwrap();
        let log = svc.get_boot_status("123A").await.unwrap();
        assert_eq!(log.last_status, ControlCardStatus::Initialized);
        assert_eq!(
            log.status,
            vec![ControlCardStatus::NotInitialized, ControlCardStatus::Initialized]
        );
        assert!(log.end_timestamp >= log.start_timestamp);
    }

    /// A rejected report must leave the ledger untouched.
    #[tokio::test]
    async fn test_report_status_rejected_leaves_ledger() {
        let (svc, _) = service(MockEntityManager {
            reject_status: true,
            ..Default::default()
        });
        svc.handle_get_bootstrap_data(request("123", &["123A"], ""))
            .await
            .unwrap();

        let err = svc
            .handle_report_status(report("123A", ProtoStatus::Initialized))
            .await
            .unwrap_err();
        assert!(matches!(err, EntityError::InvalidArgument(_)));

        let log = svc.get_boot_status("123A").await.unwrap();
        assert!(log.status.is_empty());
        assert_eq!(log.last_status, ControlCardStatus::Unspecified);
        assert_eq!(log.end_timestamp, 0);
    }

    #[tokio::test]
    async fn test_report_status_unknown_boot_commits_nothing() {
        let (svc, _) = service(MockEntityManager::default());
        svc.handle_get_bootstrap_data(request("123", &["123A"], ""))
            .await
            .unwrap();

        let mut req = report("123A", ProtoStatus::Initialized);
        req.states.push(ControlCardState {
            serial_number: "never-booted".to_string(),
            status: ProtoStatus::Initialized as i32,
        });

        let err = svc.handle_report_status(req).await.unwrap_err();
        assert!(matches!(err, EntityError::NotFound(_)));
        assert!(svc.get_boot_status("123A").await.unwrap().status.is_empty());
    }

    #[tokio::test]
    async fn test_reset_status() {
        let (svc, _) = service(MockEntityManager::default());
        let lookup = EntityLookup::new("Cisco", "123");

        svc.handle_get_bootstrap_data(request("123", &["123A"], ""))
            .await
            .unwrap();
        let _ = svc.handle_get_bootstrap_data(request("123", &[], "")).await;
        assert!(svc.is_chassis_connected(&lookup).await);

        svc.reset_status().await;
        assert!(!svc.is_chassis_connected(&lookup).await);
        assert!(svc.get_boot_status("123A").await.is_err());
        assert!(svc.failed_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_serialize() {
        let (svc, _) = service(MockEntityManager::default());

        let mut handles = Vec::new();
        for i in 0..16 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                let serial = format!("{}A", i);
                svc.handle_get_bootstrap_data(request(&i.to_string(), &[serial.as_str()], ""))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            assert!(svc.get_boot_status(&format!("{}A", i)).await.is_ok());
            assert!(
                svc.is_chassis_connected(&EntityLookup::new("Cisco", i.to_string()))
                    .await
            );
        }
    }
}
