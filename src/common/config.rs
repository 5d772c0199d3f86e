//! Configuration for roster components
//!
//! Loaded from a TOML file (path in `ROSTER_CONFIG`, default `roster.toml`)
//! with `ROSTER__SECTION__KEY` environment overrides. Every section falls back
//! to its defaults, so an absent file is not an error.

use crate::common::record::RecordRules;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "ROSTER_CONFIG";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Domain constraints on record fields
    #[serde(default)]
    pub rules: RecordRules,
}

fn default_node_id() -> String {
    "roster-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            log_level: default_log_level(),
            backend: BackendConfig::default(),
            gateway: GatewayConfig::default(),
            directory: DirectoryConfig::default(),
            rules: RecordRules::default(),
        }
    }
}

impl Config {
    /// Load from the file named by `ROSTER_CONFIG` plus environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "roster.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ROSTER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.rules.check()?;
        config.gateway.check_timings()?;
        Ok(config)
    }
}

/// Health check and deregistration timings published with a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTimings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub deregister_after_secs: u64,
}

impl CheckTimings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn deregister_after(&self) -> Duration {
        Duration::from_secs(self.deregister_after_secs)
    }
}

/// Backend (gRPC record service) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Bind address for the gRPC server
    #[serde(default = "default_backend_addr")]
    pub grpc_addr: SocketAddr,

    /// Host advertised to the directory
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Service name registered in the directory
    #[serde(default = "default_backend_service")]
    pub service_name: String,

    #[serde(default = "default_backend_tags")]
    pub tags: Vec<String>,

    #[serde(default = "default_backend_check")]
    pub check: CheckTimings,

    /// Registration attempts before startup is aborted
    #[serde(default = "default_register_attempts")]
    pub register_attempts: usize,
}

fn default_backend_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50052))
}
fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_service() -> String {
    "grpcServer".to_string()
}
fn default_backend_tags() -> Vec<String> {
    vec!["grpc".to_string()]
}
fn default_backend_check() -> CheckTimings {
    CheckTimings {
        interval_secs: 10,
        timeout_secs: 3,
        deregister_after_secs: 60,
    }
}
fn default_register_attempts() -> usize {
    3
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_backend_addr(),
            advertise_host: default_advertise_host(),
            service_name: default_backend_service(),
            tags: default_backend_tags(),
            check: default_backend_check(),
            register_attempts: default_register_attempts(),
        }
    }
}

/// Gateway (HTTP front end) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind address for HTTP
    #[serde(default = "default_gateway_addr")]
    pub bind_addr: SocketAddr,

    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Service name the gateway registers itself under
    #[serde(default = "default_gateway_service")]
    pub service_name: String,

    #[serde(default = "default_gateway_tags")]
    pub tags: Vec<String>,

    /// Backend service to discover
    #[serde(default = "default_backend_service")]
    pub backend_service: String,

    #[serde(default = "default_backend_tag")]
    pub backend_tag: String,

    /// Deadline for a single backend RPC
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Maximum suspension of one blocking discovery call
    #[serde(default = "default_watch_wait")]
    pub watch_wait_secs: u64,

    /// Discovery attempts per resolution before giving up
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: usize,

    #[serde(default = "default_discovery_backoff")]
    pub discovery_backoff_ms: u64,

    #[serde(default = "default_gateway_check")]
    pub check: CheckTimings,

    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_gateway_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8089))
}
fn default_gateway_service() -> String {
    "httpServer".to_string()
}
fn default_gateway_tags() -> Vec<String> {
    vec!["httpServer".to_string()]
}
fn default_backend_tag() -> String {
    "grpc".to_string()
}
fn default_rpc_timeout() -> u64 {
    1000
}
fn default_watch_wait() -> u64 {
    300
}
fn default_discovery_attempts() -> usize {
    3
}
fn default_discovery_backoff() -> u64 {
    200
}
fn default_gateway_check() -> CheckTimings {
    CheckTimings {
        interval_secs: 5,
        timeout_secs: 3,
        deregister_after_secs: 30,
    }
}
fn default_max_body() -> usize {
    16 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_gateway_addr(),
            advertise_host: default_advertise_host(),
            service_name: default_gateway_service(),
            tags: default_gateway_tags(),
            backend_service: default_backend_service(),
            backend_tag: default_backend_tag(),
            rpc_timeout_ms: default_rpc_timeout(),
            watch_wait_secs: default_watch_wait(),
            discovery_attempts: default_discovery_attempts(),
            discovery_backoff_ms: default_discovery_backoff(),
            check: default_gateway_check(),
            max_body_bytes: default_max_body(),
        }
    }
}

impl GatewayConfig {
    /// Reject timings that would turn the gateway into a busy loop.
    pub fn check_timings(&self) -> Result<()> {
        if self.rpc_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "gateway.rpc_timeout_ms must be positive".into(),
            ));
        }
        if self.watch_wait_secs == 0 {
            return Err(Error::InvalidConfig(
                "gateway.watch_wait_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.watch_wait_secs)
    }

    pub fn discovery_backoff(&self) -> Duration {
        Duration::from_millis(self.discovery_backoff_ms)
    }
}

/// Directory client and standalone directory server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Address of the directory HTTP API (host:port)
    #[serde(default = "default_directory_addr")]
    pub address: String,

    /// Bind address when running `roster-directory`
    #[serde(default = "default_directory_bind")]
    pub bind_addr: SocketAddr,

    /// Timeout for non-blocking directory requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Consecutive failed checks before an instance turns critical
    #[serde(default = "default_failures_before_critical")]
    pub failures_before_critical: u32,

    /// How often the standalone directory reaps expired critical instances
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

fn default_directory_addr() -> String {
    "127.0.0.1:8500".to_string()
}
fn default_directory_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8500))
}
fn default_request_timeout() -> u64 {
    5
}
fn default_failures_before_critical() -> u32 {
    1
}
fn default_reap_interval() -> u64 {
    1000
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            address: default_directory_addr(),
            bind_addr: default_directory_bind(),
            request_timeout_secs: default_request_timeout(),
            failures_before_critical: default_failures_before_critical(),
            reap_interval_ms: default_reap_interval(),
        }
    }
}

impl DirectoryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.backend.grpc_addr.port(), 50052);
        assert_eq!(config.backend.service_name, "grpcServer");
        assert_eq!(config.gateway.bind_addr.port(), 8089);
        assert_eq!(config.gateway.rpc_timeout(), Duration::from_secs(1));
        assert_eq!(config.directory.address, "127.0.0.1:8500");
        assert_eq!(config.backend.check.deregister_after(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from("/nonexistent/roster-test-config").unwrap();
        assert_eq!(config.gateway.backend_tag, "grpc");
        assert_eq!(config.rules.min_age, 10);
    }

    #[test]
    fn test_zero_gateway_timings_rejected() {
        let mut gateway = GatewayConfig::default();
        assert!(gateway.check_timings().is_ok());

        gateway.watch_wait_secs = 0;
        assert!(matches!(gateway.check_timings(), Err(Error::InvalidConfig(_))));

        gateway.watch_wait_secs = 300;
        gateway.rpc_timeout_ms = 0;
        assert!(matches!(gateway.check_timings(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_rejects_zero_watch_wait() {
        let path = std::env::temp_dir().join(format!(
            "roster-zero-wait-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[gateway]\nwatch_wait_secs = 0\n").unwrap();
        let result = Config::load_from(&path.to_string_lossy());
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
