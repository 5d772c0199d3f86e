//! Gateway dispatcher
//!
//! Turns validated gateway requests into single RPCs against a backend
//! resolved through the directory. The last known good backend is cached,
//! but only as an optimization: a transport failure (timeout or unavailable)
//! drops the cache and the call is retried exactly once against a freshly
//! discovered instance. A background watch keeps the cache in step with the
//! directory through blocking discovery.

use crate::common::{
    retry_with_backoff, Error, GatewayConfig, NewRecord, Record, RecordRules, Result, METRICS,
};
use crate::directory::{Directory, Instance, QueryCursor};
use crate::proto::liveness_reply::Status as LivenessStatus;
use crate::proto::records_client::RecordsClient;
use crate::proto::{
    FetchRequest, ListAllRequest, LivenessRequest, RegisterRequest, RemoveRequest,
    SetCategoryRequest,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tonic::transport::{Channel, Endpoint};

/// A record as returned by a single fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub category: String,
}

/// A resolved backend with a lazily connected channel
#[derive(Debug, Clone)]
struct Backend {
    instance: Instance,
    client: RecordsClient<Channel>,
}

pub struct Dispatcher {
    directory: Arc<dyn Directory>,
    config: GatewayConfig,
    rules: RecordRules,
    cached: RwLock<Option<Backend>>,
}

impl Dispatcher {
    pub fn new(directory: Arc<dyn Directory>, config: GatewayConfig, rules: RecordRules) -> Self {
        Self {
            directory,
            config,
            rules,
            cached: RwLock::new(None),
        }
    }

    pub fn rules(&self) -> &RecordRules {
        &self.rules
    }

    /// Instance currently cached as last known good
    pub fn cached_instance(&self) -> Option<Instance> {
        self.read_cache().map(|b| b.instance)
    }

    fn read_cache(&self) -> Option<Backend> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, backend: Backend) {
        tracing::debug!("Caching backend {}", backend.instance.id);
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(backend);
    }

    /// Drop the cache if it still points at `instance_id`.
    fn invalidate(&self, instance_id: &str) {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        if cached.as_ref().map(|b| b.instance.id.as_str()) == Some(instance_id) {
            *cached = None;
            METRICS.cache_invalidations.inc();
            tracing::info!("Dropped cached backend {}", instance_id);
        }
    }

    fn connect(&self, instance: Instance) -> Result<Backend> {
        let channel = Endpoint::from_shared(instance.endpoint())?
            .connect_timeout(self.config.rpc_timeout())
            .connect_lazy();
        Ok(Backend {
            instance,
            client: RecordsClient::new(channel),
        })
    }

    /// One non-blocking discovery, retried with backoff while the directory
    /// is unreachable.
    async fn discover_now(&self) -> Result<Vec<Instance>> {
        let service = self.config.backend_service.as_str();
        let tag = Some(self.config.backend_tag.as_str()).filter(|t| !t.is_empty());
        let directory = &self.directory;
        let found = retry_with_backoff(
            || {
                METRICS.discovery_calls.inc();
                directory.discover(service, tag, None, Duration::ZERO)
            },
            self.config.discovery_attempts,
            self.config.discovery_backoff(),
            |e| matches!(e, Error::DirectoryUnavailable(_)),
        )
        .await?;
        Ok(found.instances)
    }

    /// Resolve a backend through a fresh discovery, preferring any instance
    /// other than `avoid`.
    async fn resolve_fresh(&self, avoid: Option<&str>) -> Result<Backend> {
        let instances = self.discover_now().await?;
        let chosen = instances
            .iter()
            .find(|i| Some(i.id.as_str()) != avoid)
            .or_else(|| instances.first())
            .cloned()
            .ok_or_else(|| Error::NoHealthyInstance(self.config.backend_service.clone()))?;
        let backend = self.connect(chosen)?;
        self.install(backend.clone());
        Ok(backend)
    }

    async fn resolve(&self) -> Result<Backend> {
        match self.read_cache() {
            Some(backend) => Ok(backend),
            None => self.resolve_fresh(None).await,
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &str, backend: &Backend, call: &F) -> Result<T>
    where
        F: Fn(RecordsClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        let deadline = self.config.rpc_timeout();
        match tokio::time::timeout(deadline, call(backend.client.clone())).await {
            Ok(Ok(resp)) => Ok(resp.into_inner()),
            Ok(Err(status)) => Err(Error::from_grpc_status(status)),
            Err(_) => Err(Error::RpcTimeout(format!(
                "{} on {} exceeded {:?}",
                op, backend.instance.id, deadline
            ))),
        }
    }

    /// Issue `call` against the resolved backend, retrying once on a
    /// transport failure against a freshly discovered instance.
    async fn dispatch<T, F, Fut>(&self, op: &str, call: F) -> Result<T>
    where
        F: Fn(RecordsClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        let backend = self.resolve().await?;
        match self.attempt(op, &backend, &call).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    "{} on {} failed: {}, retrying with fresh discovery",
                    op,
                    backend.instance.id,
                    e
                );
                self.invalidate(&backend.instance.id);
                METRICS.dispatch_retries.inc();
                let fresh = self.resolve_fresh(Some(&backend.instance.id)).await?;
                let result = self.attempt(op, &fresh, &call).await;
                if matches!(&result, Err(e) if e.is_retryable()) {
                    self.invalidate(&fresh.instance.id);
                }
                result
            }
            other => other,
        }
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut req = tonic::Request::new(message);
        req.set_timeout(self.config.rpc_timeout());
        req
    }

    pub async fn register(&self, fields: NewRecord) -> Result<String> {
        self.rules.validate(&fields)?;
        let message = RegisterRequest {
            name: fields.name,
            age: fields.age,
            category: fields.category,
        };
        let reply = self
            .dispatch("register", |mut c| {
                let req = self.request(message.clone());
                async move { c.register(req).await }
            })
            .await?;
        Ok(reply.id)
    }

    pub async fn fetch(&self, id: &str) -> Result<RecordView> {
        let info = self
            .dispatch("fetch", |mut c| {
                let req = self.request(FetchRequest { id: id.to_string() });
                async move { c.fetch(req).await }
            })
            .await?;
        Ok(RecordView {
            id: info.id,
            name: info.name,
            age: info.age,
            category: info.category,
        })
    }

    pub async fn set_category(&self, id: &str, category: &str) -> Result<bool> {
        self.rules
            .check_category(category)
            .map_err(|v| Error::Validation(vec![v]))?;
        let reply = self
            .dispatch("set_category", |mut c| {
                let req = self.request(SetCategoryRequest {
                    id: id.to_string(),
                    category: category.to_string(),
                });
                async move { c.set_category(req).await }
            })
            .await?;
        Ok(reply.success)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let reply = self
            .dispatch("remove", |mut c| {
                let req = self.request(RemoveRequest { id: id.to_string() });
                async move { c.remove(req).await }
            })
            .await?;
        Ok(reply.success)
    }

    pub async fn list_all(&self) -> Result<Vec<Record>> {
        let list = self
            .dispatch("list_all", |mut c| {
                let req = self.request(ListAllRequest {});
                async move { c.list_all(req).await }
            })
            .await?;
        Ok(list.records.into_iter().map(Record::from).collect())
    }

    /// Whether the resolved backend reports itself as serving
    pub async fn backend_serving(&self) -> Result<bool> {
        let reply = self
            .dispatch("liveness", |mut c| {
                let req = self.request(LivenessRequest {});
                async move { c.liveness(req).await }
            })
            .await?;
        Ok(reply.status == LivenessStatus::Serving as i32)
    }

    /// Block until a healthy backend is discoverable or `timeout` elapses.
    pub async fn wait_for_backend(&self, timeout: Duration) -> Result<Instance> {
        let deadline = tokio::time::Instant::now() + timeout;
        let service = self.config.backend_service.as_str();
        let tag = Some(self.config.backend_tag.as_str()).filter(|t| !t.is_empty());
        let mut cursor: Option<QueryCursor> = None;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            METRICS.discovery_calls.inc();
            let found = self
                .directory
                .discover(service, tag, cursor, remaining)
                .await?;
            if let Some(instance) = found.instances.first().cloned() {
                self.install(self.connect(instance.clone())?);
                return Ok(instance);
            }
            if remaining.is_zero() {
                return Err(Error::NoHealthyInstance(service.to_string()));
            }
            cursor = Some(found.cursor);
        }
    }

    /// Reconcile the cache with a discovery answer.
    fn refresh(&self, instances: &[Instance]) {
        if let Some(cached) = self.cached_instance() {
            if !instances.iter().any(|i| i.id == cached.id) {
                self.invalidate(&cached.id);
            }
        }
        if self.cached_instance().is_none() {
            if let Some(first) = instances.first() {
                match self.connect(first.clone()) {
                    Ok(backend) => self.install(backend),
                    Err(e) => tracing::warn!("Cannot use backend {}: {}", first.id, e),
                }
            }
        }
    }

    /// Keep the cache fresh with blocking discovery until `shutdown` flips.
    pub async fn watch(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let service = self.config.backend_service.clone();
        let tag = Some(self.config.backend_tag.clone()).filter(|t| !t.is_empty());
        let wait = self.config.watch_wait();
        let mut cursor: Option<QueryCursor> = None;
        let mut backoff = self.config.discovery_backoff();

        tracing::info!("Watching directory for {}", service);
        loop {
            METRICS.discovery_calls.inc();
            let step = self
                .directory
                .discover(&service, tag.as_deref(), cursor, wait);
            let result = tokio::select! {
                res = step => res,
                _ = shutdown.changed() => break,
            };
            match result {
                Ok(found) => {
                    backoff = self.config.discovery_backoff();
                    if cursor != Some(found.cursor) {
                        tracing::debug!(
                            "{} healthy instance(s) of {} at index {}",
                            found.instances.len(),
                            service,
                            found.cursor.index()
                        );
                    }
                    self.refresh(&found.instances);
                    cursor = Some(found.cursor);
                }
                Err(e) => {
                    tracing::warn!(
                        "Watch on {} failed: {}, retrying in {:?}",
                        service,
                        e,
                        backoff
                    );
                    cursor = None;
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(wait.max(Duration::from_secs(1)));
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("Directory watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::directory::{LocalDirectory, ServiceDescriptor};

    fn dispatcher(directory: Arc<LocalDirectory>) -> Dispatcher {
        let config = Config::default();
        let mut gateway = config.gateway;
        gateway.discovery_backoff_ms = 1;
        Dispatcher::new(directory, gateway, config.rules)
    }

    #[tokio::test]
    async fn test_no_healthy_instance_is_distinct() {
        let d = dispatcher(Arc::new(LocalDirectory::new()));
        let err = d.list_all().await.unwrap_err();
        assert!(matches!(err, Error::NoHealthyInstance(_)));
    }

    #[tokio::test]
    async fn test_validation_precedes_discovery() {
        let d = dispatcher(Arc::new(LocalDirectory::new()));
        let err = d
            .register(NewRecord::new("1", 5, "X"))
            .await
            .unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["name", "age", "category"]);
        assert!(d.cached_instance().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_backend_times_out() {
        let d = dispatcher(Arc::new(LocalDirectory::new()));
        let err = d
            .wait_for_backend(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoHealthyInstance(_)));
    }

    #[tokio::test]
    async fn test_watch_tracks_directory() {
        let dir = Arc::new(LocalDirectory::new());
        let d = Arc::new(dispatcher(dir.clone()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(d.clone().watch(rx));

        let backend = ServiceDescriptor::new("grpcServer", "127.0.0.1", 50052).with_tags(["grpc"]);
        dir.register(&backend).await.unwrap();
        for _ in 0..100 {
            if d.cached_instance().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(d.cached_instance().map(|i| i.id), Some(backend.id.clone()));

        dir.deregister(&backend.id).await.unwrap();
        for _ in 0..100 {
            if d.cached_instance().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(d.cached_instance().is_none());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
