//! Service directory: registration, health tracking and discovery
//!
//! [`Directory`] is the seam every roster process talks through. Two
//! implementations ship:
//! - [`ConsulDirectory`]: HTTP client for a Consul agent (or `roster-directory`)
//! - [`LocalDirectory`]: in-process registry with the same semantics, used by
//!   `roster-directory` and by tests

pub mod checker;
pub mod consul;
pub mod http;
pub mod local;
pub mod server;
pub mod types;
pub mod wire;

use crate::common::Result;
use std::time::Duration;

pub use checker::{HealthMonitor, NetworkProber, Prober};
pub use consul::ConsulDirectory;
pub use local::LocalDirectory;
pub use server::DirectoryServer;
pub use types::{
    CheckSpec, CheckTarget, Discovery, HealthStatus, Instance, QueryCursor, ServiceDescriptor,
};

#[tonic::async_trait]
pub trait Directory: Send + Sync {
    /// Publish (or refresh) an instance. Idempotent per descriptor id.
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    /// Remove an instance. Unknown ids are not an error.
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// Healthy instances of `service`, optionally restricted to `tag`.
    ///
    /// With a valid `cursor` the call blocks until the service's index moves
    /// past it or `wait` elapses; without one it answers at once.
    async fn discover(
        &self,
        service: &str,
        tag: Option<&str>,
        cursor: Option<QueryCursor>,
        wait: Duration,
    ) -> Result<Discovery>;
}
