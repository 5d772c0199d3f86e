//! Record backend
//!
//! Owns the in-memory [`RecordStore`] and exposes it over gRPC.

pub mod grpc;
pub mod id;
pub mod server;
pub mod store;

pub use grpc::{HealthService, Liveness, RecordService};
pub use id::{IdGenerator, UuidGenerator};
pub use server::BackendServer;
pub use store::{Clock, ManualClock, RecordStore, SystemClock};
