//! Service directory data types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health of a registered instance as seen by directory consumers.
///
/// `Removed` is not represented: a removed instance is purged and simply
/// absent from every answer until it registers again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Critical,
}

impl HealthStatus {
    pub fn is_passing(&self) -> bool {
        matches!(self, HealthStatus::Passing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "passing" => Some(HealthStatus::Passing),
            "critical" => Some(HealthStatus::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the directory probes to decide an instance's health
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    /// `host:port/service`, probed with `grpc.health.v1.Health/Check`
    Grpc(String),
    /// Full URL, passing on any 2xx answer
    Http(String),
}

/// Health check specification published with a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub target: CheckTarget,
    pub interval: Duration,
    pub timeout: Duration,
    /// How long an instance may stay critical before it is purged
    pub deregister_critical_after: Duration,
    /// Status before the first check completes
    pub initial_status: HealthStatus,
}

impl CheckSpec {
    pub fn grpc(host: &str, port: u16, service: &str) -> Self {
        Self::grpc_target(format!("{}:{}/{}", host, port, service))
    }

    /// gRPC check from an already formatted `host:port/service` target
    pub fn grpc_target(target: impl Into<String>) -> Self {
        Self::new(CheckTarget::Grpc(target.into()))
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::new(CheckTarget::Http(url.into()))
    }

    fn new(target: CheckTarget) -> Self {
        Self {
            target,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            deregister_critical_after: Duration::from_secs(60),
            initial_status: HealthStatus::Critical,
        }
    }

    pub fn with_timings(mut self, timings: &crate::common::CheckTimings) -> Self {
        self.interval = timings.interval();
        self.timeout = timings.timeout();
        self.deregister_critical_after = timings.deregister_after();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_deregister_after(mut self, after: Duration) -> Self {
        self.deregister_critical_after = after;
        self
    }

    pub fn with_initial_status(mut self, status: HealthStatus) -> Self {
        self.initial_status = status;
        self
    }
}

/// Metadata an instance publishes to become discoverable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unique per instance; re-registering the same id replaces the entry
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    pub check: Option<CheckSpec>,
}

impl ServiceDescriptor {
    /// Descriptor whose id is derived from `(name, address, port)`
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let address = address.into();
        Self {
            id: format!("{}-{}-{}", name, address, port),
            name,
            tags: Vec::new(),
            address,
            port,
            check: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_check(mut self, check: CheckSpec) -> Self {
        self.check = Some(check);
        self
    }

    pub fn instance(&self) -> Instance {
        Instance {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            tags: self.tags.clone(),
        }
    }
}

/// A discovered, currently healthy instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

impl Instance {
    /// `host:port`
    pub fn socket(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// `http://host:port`, usable as a gRPC channel or HTTP base URL
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// Opaque position in the directory's change history.
///
/// Returned by every discovery; passing it back makes the next discovery
/// block until something changed after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryCursor(u64);

impl QueryCursor {
    pub fn from_index(index: u64) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u64 {
        self.0
    }

    /// Cursors are never zero; zero would make a blocking query return at once.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

/// Answer to a discovery call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub instances: Vec<Instance>,
    pub cursor: QueryCursor,
}
