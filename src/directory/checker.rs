//! Active health checking for [`LocalDirectory`]
//!
//! The monitor wakes on a fixed tick, runs every check that is due (each
//! bounded by its own timeout), feeds the outcomes into the directory's state
//! machine, and purges instances that stayed critical too long.

use crate::directory::local::LocalDirectory;
use crate::directory::types::CheckTarget;
use crate::proto::health::health_check_response::ServingStatus;
use crate::proto::health::health_client::HealthClient;
use crate::proto::health::HealthCheckRequest;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tonic::transport::Endpoint;

/// Runs one probe against a check target
#[tonic::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &CheckTarget, timeout: Duration) -> bool;
}

/// Probes over the network: gRPC health service or HTTP GET
#[derive(Debug, Clone)]
pub struct NetworkProber {
    http: reqwest::Client,
}

impl NetworkProber {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn probe_grpc(&self, target: &str, timeout: Duration) -> bool {
        let (socket, service) = match target.split_once('/') {
            Some((socket, service)) => (socket, service),
            None => (target, ""),
        };
        let endpoint = match Endpoint::from_shared(format!("http://{}", socket)) {
            Ok(e) => e.connect_timeout(timeout).timeout(timeout),
            Err(e) => {
                tracing::warn!("Bad gRPC check target {}: {}", target, e);
                return false;
            }
        };
        let call = async {
            let channel = endpoint.connect().await.ok()?;
            let reply = HealthClient::new(channel)
                .check(HealthCheckRequest {
                    service: service.to_string(),
                })
                .await
                .ok()?;
            Some(reply.into_inner().status == ServingStatus::Serving as i32)
        };
        matches!(tokio::time::timeout(timeout, call).await, Ok(Some(true)))
    }

    async fn probe_http(&self, url: &str, timeout: Duration) -> bool {
        match self.http.get(url).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("HTTP check {} failed: {}", url, e);
                false
            }
        }
    }
}

impl Default for NetworkProber {
    fn default() -> Self {
        Self::new()
    }
}

#[tonic::async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, target: &CheckTarget, timeout: Duration) -> bool {
        match target {
            CheckTarget::Grpc(t) => self.probe_grpc(t, timeout).await,
            CheckTarget::Http(url) => self.probe_http(url, timeout).await,
        }
    }
}

pub struct HealthMonitor {
    directory: Arc<LocalDirectory>,
    prober: Arc<dyn Prober>,
    tick: Duration,
}

impl HealthMonitor {
    pub fn new(directory: Arc<LocalDirectory>, prober: Arc<dyn Prober>, tick: Duration) -> Self {
        Self {
            directory,
            prober,
            tick,
        }
    }

    /// Run all due checks once, then reap expired instances.
    pub async fn run_once(&self) {
        let due = self.directory.due_checks(Instant::now());
        let probes = due.iter().map(|d| {
            let prober = self.prober.clone();
            async move {
                let passed = prober.probe(&d.check.target, d.check.timeout).await;
                (d.service_id.as_str(), passed)
            }
        });
        for (service_id, passed) in join_all(probes).await {
            tracing::debug!("Check {} -> {}", service_id, passed);
            self.directory.record_check(service_id, passed);
        }
        self.directory.reap_expired();
    }

    /// Tick until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.run_once().await,
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        tracing::info!("Health monitor stopped");
                        return;
                    }
                }
            }
        }
    }
}
