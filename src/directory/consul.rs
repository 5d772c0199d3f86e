//! Directory client for the Consul HTTP API
//!
//! Speaks the subset roster needs: agent service registration and
//! deregistration, and healthy-instance queries with blocking `index`/`wait`.
//! Works against a real Consul agent or a `roster-directory` process.

use crate::common::{encode_segment, format_duration, Error, Result};
use crate::directory::types::{Discovery, QueryCursor, ServiceDescriptor};
use crate::directory::wire::{AgentServiceRegistration, ServiceEntry, INDEX_HEADER};
use crate::directory::Directory;
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub struct ConsulDirectory {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl ConsulDirectory {
    /// `address` is `host:port` or a full `http://` URL.
    pub fn new(address: &str, request_timeout: Duration) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self {
            client: Client::new(),
            base_url,
            request_timeout,
        }
    }

    pub fn from_config(config: &crate::common::DirectoryConfig) -> Self {
        Self::new(&config.address, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn check_status(op: &str, status: StatusCode, body: String) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::status_error(op, status, body))
        }
    }

    /// Error for a non-2xx answer: 5xx means the directory itself is in trouble
    fn status_error(op: &str, status: StatusCode, body: String) -> Error {
        let message = format!("{} returned {}: {}", op, status, body);
        if status.is_server_error() {
            Error::DirectoryUnavailable(message)
        } else {
            Error::Http(message)
        }
    }
}

#[tonic::async_trait]
impl Directory for ConsulDirectory {
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let resp = self
            .client
            .put(&url)
            .timeout(self.request_timeout)
            .json(&AgentServiceRegistration::from(descriptor))
            .send()
            .await
            .map_err(|e| Error::DirectoryUnavailable(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Self::check_status("register", status, body)?;
        tracing::info!(
            "Registered {} at {}:{} with directory {}",
            descriptor.id,
            descriptor.address,
            descriptor.port,
            self.base_url
        );
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.base_url,
            encode_segment(service_id)
        );
        let resp = self
            .client
            .put(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::DirectoryUnavailable(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Self::check_status("deregister", status, body)
    }

    async fn discover(
        &self,
        service: &str,
        tag: Option<&str>,
        cursor: Option<QueryCursor>,
        wait: Duration,
    ) -> Result<Discovery> {
        let url = format!(
            "{}/v1/health/service/{}",
            self.base_url,
            encode_segment(service)
        );
        let mut query: Vec<(&str, String)> = vec![("passing", "true".to_string())];
        if let Some(tag) = tag {
            query.push(("tag", tag.to_string()));
        }
        // A zero wait means "answer now"; the agent would read wait=0s as its default
        let blocking = cursor.filter(|c| c.is_valid() && !wait.is_zero());
        // The agent may add up to wait/16 of jitter
        let mut timeout = self.request_timeout;
        if let Some(c) = blocking {
            query.push(("index", c.index().to_string()));
            query.push(("wait", format_duration(wait)));
            timeout += wait + wait / 16;
        }

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::DirectoryUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::status_error("discover", status, body));
        }

        let index = resp
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        // An index that went backwards means the directory reset; start over
        let index = match blocking {
            Some(c) if index < c.index() => 1,
            _ => index.max(1),
        };

        let entries: Vec<ServiceEntry> = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("malformed discovery answer: {}", e)))?;
        let instances = entries
            .into_iter()
            .filter(ServiceEntry::is_passing)
            .map(ServiceEntry::into_instance)
            .collect();

        Ok(Discovery {
            instances,
            cursor: QueryCursor::from_index(index),
        })
    }
}
