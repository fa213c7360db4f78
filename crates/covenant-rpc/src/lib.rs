//! covenant-rpc
//!
//! Hand-built HTTP/1.1 + JSON-RPC transport for covenant nodes. HTTP Basic
//! auth, a source-IP CIDR allowlist, a worker-pool semaphore standing in
//! for the original's fixed RPC thread pool, and a static per-method
//! safe-mode/thread-safety/wallet-lock flag table.

pub mod auth;
pub mod methods;
pub mod server;
pub mod types;

pub use auth::RpcCredentials;
pub use methods::RpcState;
pub use server::{RpcConfig, RpcServer, TlsFiles};
