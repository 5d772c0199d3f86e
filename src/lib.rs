//! # roster
//!
//! A student record service with:
//! - An in-memory record store with deterministic ordering
//! - gRPC for the backend, HTTP for the public gateway
//! - Consul-compatible service registration and health checking
//! - Blocking discovery so the gateway always dispatches to a healthy backend
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   HTTP client
//!       │ form POST / GET
//! ┌─────▼──────────────┐   blocking discovery   ┌──────────────────────┐
//! │ Gateway            │◄──────────────────────►│ Directory            │
//! │  (httpServer)      │   register / check     │  (Consul or          │
//! │  dispatcher+cache  │                        │   roster-directory)  │
//! └─────┬──────────────┘                        └──────────▲───────────┘
//!       │ gRPC, 1s deadline                                │ register
//! ┌─────▼──────────────┐        grpc.health.v1 check       │
//! │ Backend            │◄──────────────────────────────────┘
//! │  (grpcServer)      │
//! │  RecordStore       │
//! └────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a directory (or point at a Consul agent)
//! ```bash
//! roster-directory serve --bind 127.0.0.1:8500
//! ```
//!
//! ### Start a backend
//! ```bash
//! roster-backend serve --grpc 127.0.0.1:50052 --directory 127.0.0.1:8500
//! ```
//!
//! ### Start the gateway
//! ```bash
//! roster-gateway serve --bind 127.0.0.1:8089 --directory 127.0.0.1:8500
//! ```
//!
//! ### Use the CLI
//! ```bash
//! roster create --name Alice --age 20 --category "Software Engineering"
//! roster get <id>
//! roster set-category <id> "Computer Science"
//! roster delete <id>
//! roster list
//! ```

pub mod backend;
pub mod common;
pub mod directory;
pub mod gateway;

// Re-export commonly used types
pub use backend::BackendServer;
pub use common::{Config, Error, Result};
pub use directory::{ConsulDirectory, Directory, DirectoryServer, LocalDirectory};
pub use gateway::GatewayServer;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("roster");

    pub mod health {
        tonic::include_proto!("grpc.health.v1");
    }
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
