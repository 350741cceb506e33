//! Core proxy server module
//!
//! - Server state shared across sessions
//! - Bidirectional relay

pub mod relay;
mod server;

pub use relay::{relay, RelayResult};
pub use server::{Server, ServerBuilder};
