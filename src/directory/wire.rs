//! Consul-compatible JSON shapes
//!
//! Shared by [`super::consul::ConsulDirectory`] (client side) and
//! [`super::http`] (the standalone directory's server side).

use crate::common::{format_duration, parse_duration, Error, Result};
use crate::directory::types::{
    CheckSpec, CheckTarget, HealthStatus, Instance, ServiceDescriptor,
};
use serde::{Deserialize, Serialize};

/// Response header carrying the blocking-query index
pub const INDEX_HEADER: &str = "X-Consul-Index";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<AgentServiceCheck>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "GRPC", default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<String>,
    #[serde(rename = "HTTP", default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One element of `GET /v1/health/service/{name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub service: AgentService,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    pub status: String,
}

impl From<&ServiceDescriptor> for AgentServiceRegistration {
    fn from(d: &ServiceDescriptor) -> Self {
        let check = d.check.as_ref().map(|c| {
            let (grpc, http) = match &c.target {
                CheckTarget::Grpc(t) => (Some(t.clone()), None),
                CheckTarget::Http(u) => (None, Some(u.clone())),
            };
            AgentServiceCheck {
                grpc,
                http,
                interval: Some(format_duration(c.interval)),
                timeout: Some(format_duration(c.timeout)),
                deregister_critical_service_after: Some(format_duration(
                    c.deregister_critical_after,
                )),
                status: Some(c.initial_status.as_str().to_string()),
            }
        });
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            tags: d.tags.clone(),
            address: d.address.clone(),
            port: d.port,
            check,
        }
    }
}

impl TryFrom<AgentServiceRegistration> for ServiceDescriptor {
    type Error = Error;

    fn try_from(r: AgentServiceRegistration) -> Result<Self> {
        if r.name.is_empty() {
            return Err(Error::InvalidConfig("service Name is required".into()));
        }
        let mut descriptor = ServiceDescriptor::new(r.name, r.address, r.port).with_tags(r.tags);
        if !r.id.is_empty() {
            descriptor.id = r.id;
        }
        if let Some(c) = r.check {
            let mut spec = match (c.grpc, c.http) {
                (Some(t), None) => CheckSpec::grpc_target(t),
                (None, Some(u)) => CheckSpec::http(u),
                _ => {
                    return Err(Error::InvalidConfig(
                        "check needs exactly one of GRPC or HTTP".into(),
                    ))
                }
            };
            if let Some(i) = c.interval {
                spec.interval = parse_duration(&i)?;
            }
            if let Some(t) = c.timeout {
                spec.timeout = parse_duration(&t)?;
            }
            if let Some(d) = c.deregister_critical_service_after {
                spec.deregister_critical_after = parse_duration(&d)?;
            }
            if let Some(s) = c.status {
                spec.initial_status = HealthStatus::parse(&s)
                    .ok_or_else(|| Error::InvalidConfig(format!("unknown check status {}", s)))?;
            }
            descriptor = descriptor.with_check(spec);
        }
        Ok(descriptor)
    }
}

impl From<&Instance> for ServiceEntry {
    fn from(i: &Instance) -> Self {
        Self {
            service: AgentService {
                id: i.id.clone(),
                service: i.name.clone(),
                tags: i.tags.clone(),
                address: i.address.clone(),
                port: i.port,
            },
            checks: vec![HealthCheck {
                service_id: i.id.clone(),
                status: HealthStatus::Passing.as_str().to_string(),
            }],
        }
    }
}

impl ServiceEntry {
    /// Passing when every attached check passes
    pub fn is_passing(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.status == HealthStatus::Passing.as_str())
    }

    pub fn into_instance(self) -> Instance {
        Instance {
            id: self.service.id,
            name: self.service.service,
            address: self.service.address,
            port: self.service.port,
            tags: self.service.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_registration_json_shape() {
        let d = ServiceDescriptor::new("grpcServer", "127.0.0.1", 50052)
            .with_tags(["grpc"])
            .with_check(CheckSpec::grpc("127.0.0.1", 50052, "grpcServer"));
        let json = serde_json::to_value(AgentServiceRegistration::from(&d)).unwrap();
        assert_eq!(json["ID"], "grpcServer-127.0.0.1-50052");
        assert_eq!(json["Check"]["GRPC"], "127.0.0.1:50052/grpcServer");
        assert_eq!(json["Check"]["Interval"], "10s");
        assert_eq!(json["Check"]["DeregisterCriticalServiceAfter"], "60s");
        assert!(json["Check"].get("HTTP").is_none());
    }

    #[test]
    fn test_registration_parses_back() {
        let d = ServiceDescriptor::new("httpServer", "127.0.0.1", 8089)
            .with_tags(["httpServer"])
            .with_check(
                CheckSpec::http("http://127.0.0.1:8089/check")
                    .with_interval(Duration::from_secs(5))
                    .with_deregister_after(Duration::from_secs(30)),
            );
        let back = ServiceDescriptor::try_from(AgentServiceRegistration::from(&d)).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_check_needs_one_target() {
        let reg = AgentServiceRegistration {
            id: String::new(),
            name: "x".into(),
            tags: vec![],
            address: "127.0.0.1".into(),
            port: 1,
            check: Some(AgentServiceCheck::default()),
        };
        assert!(ServiceDescriptor::try_from(reg).is_err());
    }
}
