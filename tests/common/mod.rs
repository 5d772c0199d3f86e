//! Shared helpers for loopback integration tests

#![allow(dead_code)]

use roster::backend::RecordStore;
use roster::common::Config;
use roster::directory::{HealthMonitor, Instance, NetworkProber, QueryCursor};
use roster::{BackendServer, Directory, GatewayServer, LocalDirectory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// A server task running on a loopback port
pub struct Running {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<roster::Result<()>>,
}

impl Running {
    pub async fn stop(mut self) -> roster::Result<()> {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        self.handle.await.expect("server task panicked")
    }
}

async fn loopback() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

pub async fn spawn_backend(
    directory: Arc<dyn Directory>,
    store: Option<Arc<RecordStore>>,
) -> Running {
    let config = Config::default();
    let mut server = BackendServer::new(config.backend, config.rules, directory);
    if let Some(store) = store {
        server = server.with_store(store);
    }
    let listener = loopback().await;
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(server.serve_on(listener, async {
        let _ = rx.await;
    }));
    Running {
        addr,
        stop: Some(tx),
        handle,
    }
}

pub async fn spawn_gateway(directory: Arc<dyn Directory>) -> Running {
    let config = Config::default();
    let mut gateway = config.gateway;
    gateway.discovery_backoff_ms = 10;
    let server = GatewayServer::new(gateway, config.rules, directory);
    let listener = loopback().await;
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(server.serve_on(listener, async {
        let _ = rx.await;
    }));
    Running {
        addr,
        stop: Some(tx),
        handle,
    }
}

/// Run real health checks against `directory` until the sender flips.
pub fn spawn_monitor(directory: Arc<LocalDirectory>) -> watch::Sender<bool> {
    let (tx, rx) = watch::channel(false);
    let monitor = HealthMonitor::new(
        directory,
        Arc::new(NetworkProber::new()),
        Duration::from_millis(20),
    );
    tokio::spawn(monitor.run(rx));
    tx
}

/// Block until an instance with `port` is healthy under `service`.
pub async fn wait_healthy(directory: &dyn Directory, service: &str, port: u16) -> Instance {
    let wait = async {
        let mut cursor: Option<QueryCursor> = None;
        loop {
            let found = directory
                .discover(service, None, cursor, Duration::from_secs(1))
                .await
                .unwrap();
            if let Some(i) = found.instances.iter().find(|i| i.port == port) {
                return i.clone();
            }
            cursor = Some(found.cursor);
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("instance never became healthy")
}
