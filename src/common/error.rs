//! Error types for roster

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// gRPC metadata key carrying the comma-separated names of rejected fields.
pub const INVALID_FIELDS_METADATA: &str = "x-invalid-fields";

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum Error {
    // === Record Errors ===
    #[error("Validation failed: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Record not found: {0}")]
    NotFound(String),

    // === Directory Errors ===
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("No healthy instance of service {0}")]
    NoHealthyInstance(String),

    // === RPC Errors ===
    #[error("RPC deadline exceeded: {0}")]
    RpcTimeout(String),

    #[error("RPC endpoint unavailable: {0}")]
    RpcUnavailable(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation failure on one field.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation(vec![FieldViolation::new(field, reason)])
    }

    /// Is this a retryable error?
    ///
    /// Only transport-level RPC failures qualify. The dispatcher retries them
    /// once against a freshly discovered instance.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RpcTimeout(_) | Error::RpcUnavailable(_))
    }

    /// Short machine-readable name used in HTTP bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::DirectoryUnavailable(_) => "directory_unavailable",
            Error::NoHealthyInstance(_) => "no_healthy_instance",
            Error::RpcTimeout(_) => "rpc_timeout",
            Error::RpcUnavailable(_) => "rpc_unavailable",
            Error::Grpc(_) => "grpc",
            Error::Transport(_) => "transport",
            Error::Io(_) => "io",
            Error::Http(_) => "http",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Internal(_) => "internal",
        }
    }

    /// Names of the fields rejected by a validation failure.
    pub fn invalid_fields(&self) -> Vec<&str> {
        match self {
            Error::Validation(violations) => violations.iter().map(|v| v.field.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::NotFound(_) => tonic::Status::new(Code::NotFound, self.to_string()),
            Error::Validation(violations) => {
                let mut status = tonic::Status::new(Code::InvalidArgument, self.to_string());
                let fields = violations
                    .iter()
                    .map(|v| v.field.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                if let Ok(value) = fields.parse() {
                    status
                        .metadata_mut()
                        .insert(INVALID_FIELDS_METADATA, value);
                }
                status
            }
            Error::RpcTimeout(_) => tonic::Status::new(Code::DeadlineExceeded, self.to_string()),
            Error::RpcUnavailable(_) | Error::NoHealthyInstance(_) => {
                tonic::Status::new(Code::Unavailable, self.to_string())
            }
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }

    /// Classify a status returned by a backend call.
    pub fn from_grpc_status(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::NotFound => Error::NotFound(status.message().to_string()),
            Code::InvalidArgument => {
                let fields = status
                    .metadata()
                    .get(INVALID_FIELDS_METADATA)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let reason = status.message().to_string();
                let violations = fields
                    .split(',')
                    .filter(|f| !f.is_empty())
                    .map(|f| FieldViolation::new(f, reason.clone()))
                    .collect::<Vec<_>>();
                if violations.is_empty() {
                    Error::Validation(vec![FieldViolation::new("request", reason)])
                } else {
                    Error::Validation(violations)
                }
            }
            Code::DeadlineExceeded | Code::Cancelled => {
                Error::RpcTimeout(status.message().to_string())
            }
            Code::Unavailable => Error::RpcUnavailable(status.message().to_string()),
            _ => Error::Grpc(status),
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NoHealthyInstance(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::DirectoryUnavailable(_) | Error::RpcUnavailable(_) | Error::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::RpcTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::DirectoryUnavailable(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
