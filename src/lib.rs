//! taskline: network and concurrency core for a multi-protocol TCP server.
//!
//! - [`runtime`]: message framing, connections and protocol binding
//! - [`dispatch`]: the dispatcher thread and the delayed-task scheduler
//! - [`context`]: the shared services every component receives
//! - [`server`]: listeners, accept loops and graceful shutdown
//! - [`protocols`]: the built-in demo protocols

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod protocols;
pub mod runtime;
pub mod server;
