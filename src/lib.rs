//! MTPROTO obfuscated2 proxy
//!
//! Architecture:
//! - `obfuscated2`: handshake frames, secret and cipher derivation
//! - `stream`: async stream decorators (timeouts, accounting, logging, cipher, cancellation)
//! - `dialer`: datacenter table and outbound connects
//! - `core/`: server state and bidirectional relay
//! - `handler`: per-connection session logic
//! - `server_runner`: listener and accept loop
//! - `stats`, `stats_server`: counters, JSON endpoint and periodic reporter

pub mod config;
pub mod core;
pub mod dialer;
pub mod error;
pub mod handler;
pub mod logger;
pub mod obfuscated2;
pub mod server_runner;
pub mod stats;
pub mod stats_server;
pub mod stream;

pub use crate::core::{Server, ServerBuilder};
pub use crate::error::{ProxyError, Result};
