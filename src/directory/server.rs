//! Standalone directory process

use crate::common::{shutdown_signal, DirectoryConfig, Result};
use crate::directory::checker::{HealthMonitor, NetworkProber};
use crate::directory::http::{create_router, DirectoryState};
use crate::directory::local::LocalDirectory;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct DirectoryServer {
    config: DirectoryConfig,
    directory: Arc<LocalDirectory>,
}

impl DirectoryServer {
    pub fn new(config: DirectoryConfig) -> Self {
        let directory = Arc::new(LocalDirectory::with_failure_threshold(
            config.failures_before_critical,
        ));
        Self { config, directory }
    }

    pub fn directory(&self) -> Arc<LocalDirectory> {
        self.directory.clone()
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        tracing::info!("Starting directory");
        tracing::info!("  HTTP API: {}", local);
        tracing::info!(
            "  Failures before critical: {}",
            self.config.failures_before_critical
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = HealthMonitor::new(
            self.directory.clone(),
            Arc::new(NetworkProber::new()),
            self.config.reap_interval(),
        );
        let monitor_handle = tokio::spawn(monitor.run(stop_rx));

        let router = create_router(DirectoryState {
            directory: self.directory.clone(),
            advertise: local.to_string(),
        });

        tracing::info!("✓ Directory ready");
        let directory = self.directory.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                // Releases open blocking queries
                directory.close();
            })
            .await;

        let _ = stop_tx.send(true);
        let _ = monitor_handle.await;
        result?;
        tracing::info!("Directory stopped");
        Ok(())
    }
}
