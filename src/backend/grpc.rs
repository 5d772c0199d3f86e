//! Record gRPC service
//!
//! A thin adapter over [`RecordStore`]: every call is a single attempt, and
//! every failure goes back to the caller as a structured status (`NOT_FOUND`
//! for absent ids, `INVALID_ARGUMENT` with the rejected field names for bad
//! input). Liveness answers from an atomic flag and never touches the store.

use crate::backend::store::RecordStore;
use crate::common::{Error, FieldUpdate, NewRecord, Record};
use crate::proto::health::health_check_response::ServingStatus;
use crate::proto::health::health_server::{Health, HealthServer};
use crate::proto::health::{HealthCheckRequest, HealthCheckResponse};
use crate::proto::liveness_reply::Status as LivenessStatus;
use crate::proto::records_server::{Records, RecordsServer};
use crate::proto::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Process serving flag shared by the liveness RPC and the standard health service
#[derive(Debug, Clone)]
pub struct Liveness {
    serving: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new(serving: bool) -> Self {
        Self {
            serving: Arc::new(AtomicBool::new(serving)),
        }
    }

    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(true)
    }
}

impl From<Record> for RecordEntry {
    fn from(r: Record) -> Self {
        RecordEntry {
            id: r.id,
            name: r.name,
            age: r.age,
            category: r.category,
            created_at: r.created_at,
            modified_at: r.modified_at,
        }
    }
}

impl From<RecordEntry> for Record {
    fn from(e: RecordEntry) -> Self {
        Record {
            id: e.id,
            name: e.name,
            age: e.age,
            category: e.category,
            created_at: e.created_at,
            modified_at: e.modified_at,
        }
    }
}

fn reject(op: &str, id: &str, e: Error) -> Status {
    tracing::warn!("{} {} failed: {}", op, id, e);
    e.to_grpc_status()
}

/// RecordService implements the `roster.Records` gRPC API.
pub struct RecordService {
    store: Arc<RecordStore>,
    liveness: Liveness,
}

impl RecordService {
    pub fn new(store: Arc<RecordStore>, liveness: Liveness) -> Self {
        Self { store, liveness }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> RecordsServer<Self> {
        RecordsServer::new(self)
    }
}

#[tonic::async_trait]
impl Records for RecordService {
    async fn register(
        &self,
        req: Request<RegisterRequest>,
    ) -> Result<Response<RegisterReply>, Status> {
        let req = req.into_inner();
        let id = self
            .store
            .create(NewRecord::new(req.name, req.age, req.category))
            .map_err(|e| reject("register", "-", e))?;
        tracing::info!("register {} success", id);
        Ok(Response::new(RegisterReply { id }))
    }

    async fn fetch(&self, req: Request<FetchRequest>) -> Result<Response<RecordInfo>, Status> {
        let id = req.into_inner().id;
        let record = self.store.get(&id).map_err(|e| reject("fetch", &id, e))?;
        tracing::info!("fetch {} success", id);
        Ok(Response::new(RecordInfo {
            id: record.id,
            name: record.name,
            age: record.age,
            category: record.category,
        }))
    }

    async fn set_category(
        &self,
        req: Request<SetCategoryRequest>,
    ) -> Result<Response<OpResult>, Status> {
        let req = req.into_inner();
        self.store
            .update(&req.id, FieldUpdate::Category(req.category))
            .map_err(|e| reject("set_category", &req.id, e))?;
        tracing::info!("set_category {} success", req.id);
        Ok(Response::new(OpResult { success: true }))
    }

    async fn remove(&self, req: Request<RemoveRequest>) -> Result<Response<OpResult>, Status> {
        let id = req.into_inner().id;
        self.store.delete(&id).map_err(|e| reject("remove", &id, e))?;
        tracing::info!("remove {} success", id);
        Ok(Response::new(OpResult { success: true }))
    }

    async fn list_all(
        &self,
        _req: Request<ListAllRequest>,
    ) -> Result<Response<RecordList>, Status> {
        let records: Vec<RecordEntry> = self
            .store
            .list_all()
            .into_iter()
            .map(RecordEntry::from)
            .collect();
        tracing::info!("list_all returned {} records", records.len());
        Ok(Response::new(RecordList { records }))
    }

    async fn liveness(
        &self,
        _req: Request<LivenessRequest>,
    ) -> Result<Response<LivenessReply>, Status> {
        let status = if self.liveness.is_serving() {
            LivenessStatus::Serving
        } else {
            LivenessStatus::NotServing
        };
        Ok(Response::new(LivenessReply {
            status: status as i32,
        }))
    }
}

/// Standard `grpc.health.v1.Health` service, so a stock directory agent can
/// probe the backend with a gRPC check.
pub struct HealthService {
    service_name: String,
    liveness: Liveness,
}

impl HealthService {
    pub fn new(service_name: impl Into<String>, liveness: Liveness) -> Self {
        Self {
            service_name: service_name.into(),
            liveness,
        }
    }

    pub fn into_server(self) -> HealthServer<Self> {
        HealthServer::new(self)
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        req: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let service = req.into_inner().service;
        if !service.is_empty() && service != self.service_name {
            return Err(Status::not_found(format!("unknown service {}", service)));
        }
        let status = if self.liveness.is_serving() {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };
        Ok(Response::new(HealthCheckResponse {
            status: status as i32,
        }))
    }
}
