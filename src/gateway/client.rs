//! HTTP client for the gateway, used by the `roster` CLI

use crate::common::{Error, FieldViolation, Record, Result};
use crate::directory::Directory;
use crate::gateway::dispatcher::RecordView;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(default)]
    fields: Vec<ViolationBody>,
}

#[derive(Debug, Deserialize)]
struct ViolationBody {
    field: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SuccessBody {
    success: bool,
}

fn request_failed(e: reqwest::Error) -> Error {
    Error::Http(format!("gateway request failed: {}", e))
}

pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client for the first healthy gateway the directory knows of.
    pub async fn discover(
        directory: &dyn Directory,
        service: &str,
        tag: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let tag = Some(tag).filter(|t| !t.is_empty());
        let found = directory.discover(service, tag, None, Duration::ZERO).await?;
        let instance = found
            .instances
            .first()
            .ok_or_else(|| Error::NoHealthyInstance(service.to_string()))?;
        tracing::debug!("Using gateway {} at {}", instance.id, instance.endpoint());
        Self::new(instance.endpoint(), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx answer back into the error the gateway reported.
    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let Ok(body) = serde_json::from_str::<ErrorBody>(&text) else {
            return Err(Error::Http(format!("{}: {}", status, text)));
        };
        Err(match (status, body.error.as_str()) {
            (StatusCode::BAD_REQUEST, "validation") => Error::Validation(
                body.fields
                    .into_iter()
                    .map(|v| FieldViolation::new(v.field, v.reason))
                    .collect(),
            ),
            (StatusCode::NOT_FOUND, _) => Error::NotFound(body.message),
            (StatusCode::SERVICE_UNAVAILABLE, _) => Error::NoHealthyInstance(body.message),
            (StatusCode::BAD_GATEWAY, "directory_unavailable") => {
                Error::DirectoryUnavailable(body.message)
            }
            (StatusCode::BAD_GATEWAY, "rpc_unavailable" | "transport") => {
                Error::RpcUnavailable(body.message)
            }
            (StatusCode::GATEWAY_TIMEOUT, _) => Error::RpcTimeout(body.message),
            _ => Error::Http(format!("{}: {}", status, body.message)),
        })
    }

    pub async fn create(&self, name: &str, age: i32, category: &str) -> Result<String> {
        let age = age.to_string();
        let resp = self
            .client
            .post(self.url("/records"))
            .form(&[("name", name), ("age", age.as_str()), ("category", category)])
            .send()
            .await
            .map_err(request_failed)?;
        let body: IdBody = Self::check(resp).await?.json().await?;
        Ok(body.id)
    }

    pub async fn get(&self, id: &str) -> Result<RecordView> {
        let resp = self
            .client
            .get(self.url(&format!("/records/{}", crate::common::encode_segment(id))))
            .send()
            .await
            .map_err(request_failed)?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn set_category(&self, id: &str, category: &str) -> Result<bool> {
        let resp = self
            .client
            .patch(self.url(&format!("/records/{}", crate::common::encode_segment(id))))
            .form(&[("category", category)])
            .send()
            .await
            .map_err(request_failed)?;
        let body: SuccessBody = Self::check(resp).await?.json().await?;
        Ok(body.success)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(self.url(&format!("/records/{}", crate::common::encode_segment(id))))
            .send()
            .await
            .map_err(request_failed)?;
        let body: SuccessBody = Self::check(resp).await?.json().await?;
        Ok(body.success)
    }

    pub async fn list(&self) -> Result<Vec<Record>> {
        let resp = self
            .client
            .get(self.url("/records"))
            .send()
            .await
            .map_err(request_failed)?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Gateway liveness, independent of the backend
    pub async fn check_alive(&self) -> Result<bool> {
        let resp = self
            .client
            .get(self.url("/check"))
            .send()
            .await
            .map_err(request_failed)?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::LocalDirectory;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use axum::Router;

    /// Gateway stand-in that answers every listing with `status` and `body`.
    async fn failing_gateway(status: HttpStatus, body: &'static str) -> GatewayClient {
        let app = Router::new().route(
            "/records",
            get(move || async move {
                (status, [("content-type", "application/json")], body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        GatewayClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_base_url_trimmed() {
        let c = GatewayClient::new("http://127.0.0.1:8089/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.base_url(), "http://127.0.0.1:8089");
    }

    #[tokio::test]
    async fn test_discover_without_gateway() {
        let dir = LocalDirectory::new();
        let err = GatewayClient::discover(&dir, "httpServer", "httpServer", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NoHealthyInstance(_)));
    }

    #[tokio::test]
    async fn test_bad_gateway_keeps_error_kind() {
        let client = failing_gateway(
            HttpStatus::BAD_GATEWAY,
            r#"{"error":"rpc_unavailable","message":"down"}"#,
        )
        .await;
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, Error::RpcUnavailable(ref m) if m == "down"));

        let client = failing_gateway(
            HttpStatus::BAD_GATEWAY,
            r#"{"error":"directory_unavailable","message":"agent gone"}"#,
        )
        .await;
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, Error::DirectoryUnavailable(ref m) if m == "agent gone"));
    }

    #[tokio::test]
    async fn test_unknown_bad_gateway_kind_stays_http() {
        let client = failing_gateway(
            HttpStatus::BAD_GATEWAY,
            r#"{"error":"something_else","message":"odd"}"#,
        )
        .await;
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
