//! Backend server: gRPC record service plus directory registration

use crate::backend::grpc::{HealthService, Liveness, RecordService};
use crate::backend::store::RecordStore;
use crate::common::{
    retry_with_backoff, shutdown_signal, BackendConfig, Error, RecordRules, Result,
};
use crate::directory::{CheckSpec, Directory, ServiceDescriptor};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

/// First delay between registration attempts; doubles each time
const REGISTER_BACKOFF: Duration = Duration::from_millis(200);

pub struct BackendServer {
    config: BackendConfig,
    store: Arc<RecordStore>,
    liveness: Liveness,
    directory: Arc<dyn Directory>,
}

impl BackendServer {
    pub fn new(config: BackendConfig, rules: RecordRules, directory: Arc<dyn Directory>) -> Self {
        Self {
            config,
            store: Arc::new(RecordStore::new(rules)),
            liveness: Liveness::default(),
            directory,
        }
    }

    /// Serve an existing store (tests inject one with a manual clock).
    pub fn with_store(mut self, store: Arc<RecordStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> Arc<RecordStore> {
        self.store.clone()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// What this instance publishes once bound to `port`
    pub fn descriptor(&self, port: u16) -> ServiceDescriptor {
        let host = &self.config.advertise_host;
        ServiceDescriptor::new(&self.config.service_name, host.as_str(), port)
            .with_tags(self.config.tags.iter().cloned())
            .with_check(
                CheckSpec::grpc(host, port, &self.config.service_name)
                    .with_timings(&self.config.check),
            )
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.grpc_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Register, serve on `listener` until `shutdown` resolves, deregister.
    ///
    /// Registration failure is fatal: an unregistered backend could never be
    /// discovered.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        let descriptor = self.descriptor(local.port());

        tracing::info!("Starting backend");
        tracing::info!("  gRPC API: {}", local);
        tracing::info!("  Service: {} ({})", descriptor.name, descriptor.id);

        let directory = self.directory.clone();
        retry_with_backoff(
            || directory.register(&descriptor),
            self.config.register_attempts,
            REGISTER_BACKOFF,
            |e| matches!(e, Error::DirectoryUnavailable(_)),
        )
        .await
        .map_err(|e| {
            tracing::error!("Registration of {} failed: {}", descriptor.id, e);
            e
        })?;

        let records = RecordService::new(self.store.clone(), self.liveness.clone());
        let health = HealthService::new(&self.config.service_name, self.liveness.clone());
        let liveness = self.liveness.clone();

        tracing::info!("✓ Backend ready");
        let result = tonic::transport::Server::builder()
            .add_service(records.into_server())
            .add_service(health.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.await;
                liveness.set_serving(false);
            })
            .await;

        if let Err(e) = self.directory.deregister(&descriptor.id).await {
            tracing::warn!("Deregistration of {} failed: {}", descriptor.id, e);
        }
        result?;
        tracing::info!("Backend stopped");
        Ok(())
    }
}
