//! Common utilities and types shared across roster components

pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod tracing_middleware;
pub mod utils;

pub use config::{BackendConfig, CheckTimings, Config, DirectoryConfig, GatewayConfig};
pub use error::{Error, FieldViolation, Result};
pub use metrics::{MetricsRegistry, METRICS};
pub use record::{FieldUpdate, NameCharset, NewRecord, Record, RecordRules};
pub use utils::{
    encode_segment, format_duration, parse_duration, retry_with_backoff, shutdown_signal,
    timestamp_now,
};
