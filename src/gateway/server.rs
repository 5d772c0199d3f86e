//! Gateway server

use crate::common::{
    retry_with_backoff, shutdown_signal, Error, GatewayConfig, RecordRules, Result,
};
use crate::directory::{CheckSpec, Directory, ServiceDescriptor};
use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::http::{create_router, GatewayState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

const REGISTER_BACKOFF: Duration = Duration::from_millis(200);

pub struct GatewayServer {
    config: GatewayConfig,
    directory: Arc<dyn Directory>,
    dispatcher: Arc<Dispatcher>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, rules: RecordRules, directory: Arc<dyn Directory>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(directory.clone(), config.clone(), rules));
        Self {
            config,
            directory,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// What this gateway publishes once bound to `port`; checked over HTTP
    pub fn descriptor(&self, port: u16) -> ServiceDescriptor {
        let host = &self.config.advertise_host;
        ServiceDescriptor::new(&self.config.service_name, host.as_str(), port)
            .with_tags(self.config.tags.iter().cloned())
            .with_check(
                CheckSpec::http(format!("http://{}:{}/check", host, port))
                    .with_timings(&self.config.check),
            )
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Register, start the discovery watch, serve until `shutdown`, then
    /// stop the watch and deregister.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.check_timings()?;
        let local = listener.local_addr()?;
        let descriptor = self.descriptor(local.port());

        tracing::info!("Starting gateway");
        tracing::info!("  HTTP API: {}", local);
        tracing::info!(
            "  Backend: {} (tag {})",
            self.config.backend_service,
            self.config.backend_tag
        );
        tracing::info!("  RPC deadline: {:?}", self.config.rpc_timeout());

        let directory = self.directory.clone();
        retry_with_backoff(
            || directory.register(&descriptor),
            self.config.discovery_attempts,
            REGISTER_BACKOFF,
            |e| matches!(e, Error::DirectoryUnavailable(_)),
        )
        .await
        .map_err(|e| {
            tracing::error!("Registration of {} failed: {}", descriptor.id, e);
            e
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let watch_handle = tokio::spawn(self.dispatcher.clone().watch(stop_rx));

        let router = create_router(GatewayState {
            dispatcher: self.dispatcher.clone(),
            max_body_bytes: self.config.max_body_bytes,
        });

        tracing::info!("✓ Gateway ready");
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_tx.send(true);
        let _ = watch_handle.await;
        if let Err(e) = self.directory.deregister(&descriptor.id).await {
            tracing::warn!("Deregistration of {} failed: {}", descriptor.id, e);
        }
        result?;
        tracing::info!("Gateway stopped");
        Ok(())
    }
}
