//! HTTP gateway
//!
//! Accepts form-encoded requests, validates them, and dispatches each one as
//! a single RPC to a backend found through the directory.

pub mod client;
pub mod dispatcher;
pub mod forms;
pub mod http;
pub mod server;

pub use client::GatewayClient;
pub use dispatcher::{Dispatcher, RecordView};
pub use server::GatewayServer;
