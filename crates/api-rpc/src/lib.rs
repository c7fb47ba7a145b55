//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 server for the Courier agent task pipeline.
//! Methods are versioned (`agent.submit.v1`, ...) so clients can pin a contract.

pub mod error;
pub mod handler;
mod rate_limiter;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
