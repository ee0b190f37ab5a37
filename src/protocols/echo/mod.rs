//! Echo protocol implementation.
//!
//! Every frame's unread body is sent back as one reply frame. Useful for
//! throughput testing and for checking that framing survives partial reads
//! and writes.
//!
//! ## Protocol Format
//!
//! ```text
//! First frame:  01 <data>
//! Reply:        <data>
//!
//! Later frames: <data>
//! Reply:        <data>
//! ```
//!
//! Empty bodies produce no reply.

pub mod handler;

pub use handler::Echo;
