//! Ping protocol implementation.
//!
//! A minimal binary protocol for health checks and latency measurement.
//! Replies carry the server's wall clock so a client can estimate skew as
//! well as round-trip time.
//!
//! ## Protocol Format
//!
//! All integers are little-endian. A frame may carry several commands.
//!
//! ```text
//! Request:  01 <seq: u32>             PING
//! Response: 02 <seq: u32> <ms: u64>   PONG
//!
//! Request:  03                        QUIT
//! ```
//!
//! Unknown opcodes and truncated commands close the connection.

pub mod handler;
pub mod parser;

pub use handler::Ping;
