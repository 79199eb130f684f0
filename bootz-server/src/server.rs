//! Server lifecycle: TLS listener, gRPC router and start/stop/reload.

use crate::artifacts::SecurityArtifacts;
use crate::config::ServerConfig;
use crate::entity::{EntityError, InMemoryEntityManager};
use crate::service::{BootstrapRateLimiter, BootstrapService, Ledger, RateLimitInterceptor};
use crate::tls::{TlsConfigError, TlsConnection, TlsServerConfig};
use bootz_proto::bootstrap_server::BootstrapServer;
use bootz_proto::FILE_DESCRIPTOR_SET;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tonic::transport::Server;

/// Connections that don't finish the TLS handshake in time are dropped.
const TLS_HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server was never started")]
    NotStarted,

    #[error("no security artifact directory configured")]
    NoArtifactDir,

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error("server task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Tls(#[from] TlsConfigError),

    #[error("unable to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error("transport: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Lifecycle state of a [`BootzServer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerStatus {
    #[default]
    Stopped,
    Running,
    /// The last start attempt failed.
    Failed,
    /// Stopped after having run.
    Exited,
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
    service: BootstrapService,
}

/// Owns the listener task of one bootstrap server instance.
#[derive(Default)]
pub struct BootzServer {
    status: ServerStatus,
    config: Option<ServerConfig>,
    running: Option<Running>,
    last_error: Option<String>,
}

impl BootzServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Address actually bound, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// The orchestrator serving requests, while running.
    pub fn service(&self) -> Option<&BootstrapService> {
        self.running.as_ref().map(|r| &r.service)
    }

    /// Why the last start attempt failed, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Load artifacts and inventory, bind, and start serving.
    pub async fn start(&mut self, config: ServerConfig) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        match launch(&config).await {
            Ok(running) => {
                let addr = running.local_addr;
                tracing::info!(address = %addr, "Bootz server started");
                self.running = Some(running);
                self.config = Some(config);
                self.status = ServerStatus::Running;
                self.last_error = None;
                Ok(addr)
            }
            Err(e) => {
                tracing::error!(error = %e, "Bootz server failed to start");
                self.config = Some(config);
                self.status = ServerStatus::Failed;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop accepting connections and wait for in-flight RPCs to finish.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        let result = match running.handle.await {
            Ok(result) => result.map_err(ServerError::from),
            Err(e) => Err(ServerError::Task(e.to_string())),
        };

        match &result {
            Ok(()) => {
                self.status = ServerStatus::Exited;
                tracing::info!(address = %running.local_addr, "Bootz server stopped");
            }
            Err(e) => {
                self.status = ServerStatus::Failed;
                self.last_error = Some(e.to_string());
                tracing::error!(address = %running.local_addr, error = %e, "Bootz server exited with an error");
            }
        }
        result
    }

    /// Stop, then start again with the same configuration on the address
    /// that was bound, picking up changed artifacts and inventory.
    pub async fn reload(&mut self) -> Result<SocketAddr, ServerError> {
        let mut config = self.config.clone().ok_or(ServerError::NotStarted)?;
        if let Some(addr) = self.local_addr() {
            config.address = addr.to_string();
        }

        self.stop().await?;
        tracing::info!(address = %config.address, "Reloading bootz server");
        self.start(config).await
    }
}

/// Everything needed to serve, resolved from configuration.
pub struct Prepared {
    pub entity_manager: Arc<InMemoryEntityManager>,
    pub artifacts: Arc<SecurityArtifacts>,
}

/// Load the inventory and the security artifacts named by `config`.
pub fn prepare(config: &ServerConfig) -> Result<Prepared, ServerError> {
    let entity_manager = InMemoryEntityManager::load(
        config.inventory.as_deref(),
        config.artifact_dir.as_deref(),
    )?;
    let artifacts = entity_manager
        .artifacts()
        .cloned()
        .ok_or(ServerError::NoArtifactDir)?;

    tracing::info!(
        fingerprint = %artifacts.tls.fingerprint,
        vouchers = artifacts.ovs.len(),
        "Security artifacts loaded"
    );
    let now = chrono::Utc::now().timestamp();
    for (name, pair) in [
        ("oc", &artifacts.oc),
        ("pdc", &artifacts.pdc),
        ("vendorca", &artifacts.vendor_ca),
    ] {
        log_certificate(name, pair.cert_pem(), now);
    }

    tracing::info!(chassis = entity_manager.get_all().len(), "Inventory loaded");

    Ok(Prepared {
        entity_manager: Arc::new(entity_manager),
        artifacts,
    })
}

/// Warn about certificates that devices will refuse; loading still succeeds.
fn log_certificate(name: &str, cert_pem: &str, now: i64) {
    let der = match bootz_auth::pem_to_der(cert_pem) {
        Ok(der) => der,
        Err(e) => {
            tracing::warn!(artifact = name, error = %e, "Unreadable certificate");
            return;
        }
    };
    let subject = bootz_auth::subject(&der).unwrap_or_default();
    match bootz_auth::check_validity(&der, now) {
        Ok(()) => tracing::debug!(artifact = name, %subject, "Certificate in validity window"),
        Err(e) => tracing::warn!(artifact = name, %subject, error = %e, "Certificate outside validity window"),
    }
}

async fn launch(config: &ServerConfig) -> Result<Running, ServerError> {
    let Prepared {
        entity_manager,
        artifacts,
    } = prepare(config)?;

    if let Some(intf) = &config.dhcp_intf {
        for (key, assignment) in entity_manager.address_assignments() {
            tracing::info!(
                interface = %intf,
                client = %key,
                ip = %assignment.ip_address,
                gateway = %assignment.gateway,
                "DHCP assignment"
            );
        }
    }

    let acceptor = TlsServerConfig::for_identity(&artifacts.tls)?.acceptor();

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
        address: address.clone(),
        source,
    })?;
    tracing::info!(address = %local_addr, "Listener bound");

    let service = BootstrapService::new(entity_manager, Arc::new(Ledger::new()));
    let interceptor =
        RateLimitInterceptor::new(BootstrapRateLimiter::new(config.rate_limit));

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let router = Server::builder()
        .add_service(reflection)
        .add_service(BootstrapServer::with_interceptor(service.clone(), interceptor));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx_accept = shutdown_tx.subscribe();
    let mut shutdown_rx_serve = shutdown_tx.subscribe();

    let incoming = async_stream::stream! {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, peer_addr)) => {
                            let acceptor = acceptor.clone();
                            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp_stream)).await {
                                Ok(Ok(tls_stream)) => {
                                    let conn = TlsConnection::new(tls_stream, Some(peer_addr));
                                    tracing::debug!(
                                        peer = %peer_addr,
                                        sni = ?conn.info().server_name,
                                        h2 = conn.info().alpn.as_deref() == Some(b"h2".as_slice()),
                                        "TLS handshake successful"
                                    );
                                    yield Ok::<_, std::io::Error>(conn);
                                }
                                Ok(Err(e)) => {
                                    tracing::warn!(peer = %peer_addr, error = %e, "TLS handshake failed");
                                }
                                Err(_) => {
                                    tracing::warn!(peer = %peer_addr, timeout_secs = ?TLS_HANDSHAKE_TIMEOUT, "TLS handshake timed out");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "TCP accept failed");
                        }
                    }
                }
                _ = shutdown_rx_accept.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }
    };

    let handle = tokio::spawn(async move {
        router
            .serve_with_incoming_shutdown(incoming, async move {
                let _ = shutdown_rx_serve.recv().await;
            })
            .await
    });

    Ok(Running {
        local_addr,
        shutdown_tx,
        handle,
        service,
    })
}
